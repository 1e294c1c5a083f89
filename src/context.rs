//! Request-scoped issuer hints.
//!
//! Upstream request handling attaches an [`IssuerDomain`] to the request extensions (typically the
//! `iss` claim of the presented token). The [`IssuerManager`](crate::IssuerManager) only reads it.

// std
use std::fmt::{Display, Formatter, Result as FmtResult};
// crates.io
use http::{Extensions, Request, request::Parts};

/// Issuer domain hint carried in request extensions.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IssuerDomain(String);
impl IssuerDomain {
	/// Wrap a raw issuer URL or domain.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Raw hint value.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Display for IssuerDomain {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str(&self.0)
	}
}
impl From<&str> for IssuerDomain {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}
impl From<String> for IssuerDomain {
	fn from(value: String) -> Self {
		Self(value)
	}
}

/// Source of an optional issuer domain hint for a single request.
pub trait IssuerContext {
	/// Issuer domain attached to the request, if any.
	fn issuer_domain(&self) -> Option<&str>;
}
impl IssuerContext for Extensions {
	fn issuer_domain(&self) -> Option<&str> {
		self.get::<IssuerDomain>().map(IssuerDomain::as_str)
	}
}
impl IssuerContext for Parts {
	fn issuer_domain(&self) -> Option<&str> {
		self.extensions.issuer_domain()
	}
}
impl<B> IssuerContext for Request<B> {
	fn issuer_domain(&self) -> Option<&str> {
		self.extensions().issuer_domain()
	}
}
impl IssuerContext for IssuerDomain {
	fn issuer_domain(&self) -> Option<&str> {
		Some(self.as_str())
	}
}
impl IssuerContext for str {
	fn issuer_domain(&self) -> Option<&str> {
		Some(self)
	}
}
impl IssuerContext for String {
	fn issuer_domain(&self) -> Option<&str> {
		Some(self)
	}
}
impl<T> IssuerContext for &T
where
	T: IssuerContext + ?Sized,
{
	fn issuer_domain(&self) -> Option<&str> {
		(**self).issuer_domain()
	}
}
impl<T> IssuerContext for Option<T>
where
	T: IssuerContext,
{
	fn issuer_domain(&self) -> Option<&str> {
		self.as_ref().and_then(IssuerContext::issuer_domain)
	}
}
