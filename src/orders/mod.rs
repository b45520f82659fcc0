//! Order lifecycle.

pub mod machine;
pub mod model;

pub use machine::OrderStateMachine;
pub use model::{LineItem, NewOrder, Order, OrderChannel, OrderCommand, OrderState};
