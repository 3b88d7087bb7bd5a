//! Test suites for the srpc engine and the `srpcd` daemon.

mod behaviour;
mod support;
