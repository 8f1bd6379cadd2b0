pub mod structured;

pub use structured::{invoke_structured, parse_json_response};
