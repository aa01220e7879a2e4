//! Integration tests driving the full stack against an in-process HTTP/2 server

mod server;
mod session_tests;
