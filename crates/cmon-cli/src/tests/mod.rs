//! Tests for the CLI runtime.

mod support;
