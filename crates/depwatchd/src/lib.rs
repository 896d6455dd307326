//! depwatchd — HTTP surface and wiring for the depwatch daemon.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/health` | `{key: bool}`; 503 when a critical endpoint is unhealthy |
//! | GET | `/health/details` | `{key: EndpointStatus}`, UNKNOWN endpoints included |

pub mod api;
pub mod logging;

pub use api::{ApiState, build_router};
