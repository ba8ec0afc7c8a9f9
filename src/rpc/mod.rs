//! Request/response correlation.
//!
//! [`Correlator`] owns the identifier counter and the table of pending
//! requests. Callers `await` their own response while a single reader task
//! feeds every incoming frame to [`Correlator::handle_frame`].

mod correlator;
mod pending;

pub use correlator::Correlator;
