
mod controller_tests;
