pub mod request_events;

pub use request_events::{request_events, REQUEST_ID_HEADER};
