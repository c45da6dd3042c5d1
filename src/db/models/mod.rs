//! Database models split into domain-specific modules.

pub mod cart;
pub mod common;
pub mod menu_item;
pub mod order;
pub mod restaurant;
pub mod user;

pub use cart::*;
pub use common::*;
pub use menu_item::*;
pub use order::*;
pub use restaurant::*;
pub use user::*;
