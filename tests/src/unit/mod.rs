mod app_tests;
mod realtime_tests;
mod session_tests;
