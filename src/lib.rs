#[macro_export]
macro_rules! debug_log {
	($($arg:tt)*) => {{
		#[cfg(debug_assertions)]
		{
			eprintln!($($arg)*);
		}
	}};
}

pub mod client;
pub mod config;
pub mod error;
pub mod field_filter;
pub mod field_gate;
pub mod schema;
pub mod server;
pub mod validator;
