pub mod dispatcher;
pub mod poller;
