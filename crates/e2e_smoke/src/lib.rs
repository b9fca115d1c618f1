//! End-to-end smoke tests for `eqs-service` live under `tests/`.
