//! Command-and-control: requests, reply envelopes, and the action
//! interpreter driving the controller.

pub mod interpreter;
pub mod request;

pub use request::CncRequest;
