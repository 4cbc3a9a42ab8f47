//! Event normalization and delivery
//!
//! Vendor callbacks become [`canonical::CanonicalEvent`]s inside the adapter,
//! the [`normalizer::EventNormalizer`] owns the subscriptions, and the
//! [`dispatcher::EventDispatcher`] queues them for the consumer.

pub mod canonical;
pub mod dispatcher;
pub mod normalizer;
