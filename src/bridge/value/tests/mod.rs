//! Tests for the boundary value model
