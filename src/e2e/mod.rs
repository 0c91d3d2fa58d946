mod mtls_handshake;
mod util;
