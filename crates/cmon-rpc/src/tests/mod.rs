//! Loopback tests that drive the client against a fake controller.

pub(crate) mod support;
