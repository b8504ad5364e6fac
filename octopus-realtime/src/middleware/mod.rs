//! HTTP middleware layers

pub mod request_tracking;

pub use request_tracking::{
    request_id_layer, request_id_propagation_layer, sensitive_headers_layer, PROPAGATE_HEADERS,
    SENSITIVE_HEADERS,
};
