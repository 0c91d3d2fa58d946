pub mod insecure;
pub mod tls;
