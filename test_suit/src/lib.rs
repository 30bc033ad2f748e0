//! Integration tests that need a live PostgreSQL, started through testcontainers.

mod adapter;
