pub mod dispatcher;
pub mod scope;
pub mod types;
