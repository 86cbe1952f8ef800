//! Integration tests for the toy machinery
//!
//! Tests are organized by topic:
//! - `fit_result` - Populating, flattening and sampling fit results
//! - `systematics` - Strategy registry and parameter randomization
//! - `toy_loop` - Full generate/fit runs and their stored output

mod toy_loop;
