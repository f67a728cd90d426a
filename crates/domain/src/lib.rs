pub mod entities;
pub mod state;
pub mod updates;

pub use entities::*;
pub use state::DispatcherState;
pub use updates::Update;
