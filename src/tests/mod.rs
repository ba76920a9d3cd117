//! Scenario tests for the weather station binary.
//!
//! These drive a complete [`StationController`](weather_station_lib::controller::StationController)
//! with a manual clock, a scripted forecast service and a recording panel, so
//! whole days of scheduling run in milliseconds without network or hardware.

mod cli_tests;
mod station_tests;
