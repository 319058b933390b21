
use std::fmt;
use std::error::Error as StdError;

use anyhow::Context;


/// Tag for [anyhow] errors caused by invalid user input.
pub struct BadArgument {
	context: Box<dyn fmt::Display + Send + Sync + 'static>,
}

impl BadArgument {
	pub fn new(context: impl fmt::Display + Send + Sync + 'static) -> BadArgument {
		BadArgument { context: Box::new(context) }
	}
}

impl fmt::Debug for BadArgument {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}

impl fmt::Display for BadArgument {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "bad argument: {}", self.context)
	}
}

impl StdError for BadArgument {}

/// Tag for [anyhow] errors caused by a missing resource, session or template.
pub struct NotFound {
	ids: Vec<String>,
	context: Box<dyn fmt::Display + Send + Sync + 'static>,
}

impl NotFound {
	pub fn new<I, V>(ids: V, context: impl fmt::Display + Send + Sync + 'static) -> NotFound
	where
		V: IntoIterator<Item = I>,
		I: fmt::Display,
	{
		NotFound {
			ids: ids.into_iter().map(|i| i.to_string()).collect(),
			context: Box::new(context),
		}
	}

	pub fn identifiers(&self) -> &[String] {
		&self.ids
	}
}

impl fmt::Debug for NotFound {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}

impl fmt::Display for NotFound {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "not found: {} ({})", self.context, self.ids.join(", "))
	}
}

impl StdError for NotFound {}

/// Return an [anyhow] error tagged with [BadArgument].
#[macro_export]
macro_rules! badarg {
	($($arg:tt)*) => {
		Err($crate::anyhow::Error::from($crate::error::BadArgument::new(format!($($arg)*))))
	};
}

/// Return an [anyhow] error tagged with [NotFound].
#[macro_export]
macro_rules! not_found {
	($ids:expr, $($arg:tt)*) => {
		Err($crate::anyhow::Error::from($crate::error::NotFound::new($ids, format!($($arg)*))))
	};
}

/// Extension trait to tag errors with [BadArgument] or [NotFound].
pub trait ContextExt<T, E>: Context<T, E> {
	fn badarg<C>(self, context: C) -> anyhow::Result<T>
		where C: fmt::Display + Send + Sync + 'static;

	fn not_found<I, V, C>(self, ids: V, context: C) -> anyhow::Result<T>
	where
		V: IntoIterator<Item = I>,
		I: fmt::Display,
		C: fmt::Display + Send + Sync + 'static;
}

impl<R, T, E> ContextExt<T, E> for R
where
	R: Context<T, E>,
{
	fn badarg<C>(self, context: C) -> anyhow::Result<T>
	where
		C: fmt::Display + Send + Sync + 'static,
	{
		self.context(BadArgument::new(context))
	}

	fn not_found<I, V, C>(self, ids: V, context: C) -> anyhow::Result<T>
	where
		V: IntoIterator<Item = I>,
		I: fmt::Display,
		C: fmt::Display + Send + Sync + 'static,
	{
		self.context(NotFound::new(ids, context))
	}
}

/// Whether the error was caused by the user rather than by us.
pub fn is_user_error(e: &anyhow::Error) -> bool {
	e.downcast_ref::<BadArgument>().is_some() || e.downcast_ref::<NotFound>().is_some()
}

#[cfg(test)]
mod test {
	use covenant::CashAddress;

	use super::*;

	#[test]
	fn tags_survive_context() {
		let e = "bitcoincash:qq".parse::<CashAddress>()
			.badarg("invalid recipient address")
			.context("building allocation")
			.unwrap_err();
		assert!(e.downcast_ref::<BadArgument>().is_some());
		assert!(e.downcast_ref::<NotFound>().is_none());
		assert!(is_user_error(&e));

		let e = Option::<()>::None
			.not_found(["plan-1"], "deployment record")
			.unwrap_err();
		let nf = e.downcast_ref::<NotFound>().unwrap();
		assert_eq!(nf.identifiers(), &["plan-1".to_owned()]);
		assert_eq!(e.to_string(), "not found: deployment record (plan-1)");

		let e = anyhow!("disk on fire");
		assert!(!is_user_error(&e));
	}

	#[test]
	fn macros() {
		let r: anyhow::Result<()> = badarg!("amount {} too low", 15);
		assert!(is_user_error(&r.unwrap_err()));
		let r: anyhow::Result<()> = not_found!([12], "session {}", 12);
		assert!(r.unwrap_err().downcast_ref::<NotFound>().is_some());
	}
}
