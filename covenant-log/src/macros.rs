
#[macro_export]
macro_rules! impl_slog {
	($name:ident, $lvl:ident, $msg:expr $(,)?) => {
		impl $crate::LogMsg for $name {
			const LOGID: &'static str = stringify!($name);
			const LEVEL: log::Level = log::Level::$lvl;
			const MSG: &'static str = $msg;
		}
	};
}

#[macro_export]
macro_rules! slog {
	($struct:ident) => {{
		if $crate::enabled::<$crate::$struct>() {
			$crate::log(&$crate::$struct {}, module_path!(), file!(), line!());
		}
	}};
	($struct:ident, $($args:tt)+) => {{
		if $crate::enabled::<$crate::$struct>() {
			$crate::log(&$crate::$struct { $($args)* }, module_path!(), file!(), line!());
		}
	}};
}
