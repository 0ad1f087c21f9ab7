//! Client side: membership tracking and request dispatch
//!
//! The [`MembershipTracker`] keeps a [`RegistryView`] current from registry
//! watch notifications; the [`Dispatcher`] reads the same view to spread a
//! fixed number of requests across the live servers.

pub mod dispatcher;
pub mod membership;
pub mod view;

pub use dispatcher::{send_stop, DispatchReport, Dispatcher};
pub use membership::{MembershipTracker, RefreshReport};
pub use view::RegistryView;
