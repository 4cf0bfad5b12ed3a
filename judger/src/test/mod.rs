mod server_tests;
mod util;
