pub mod dispatcher;
pub mod health;
pub mod worker;
