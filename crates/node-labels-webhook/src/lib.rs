/*
 * 5D Labs Agent Platform - Node Labels Admission Webhook
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Node labels webhook
//!
//! A Kubernetes mutating admission webhook that lets pods read the labels of
//! the node they are scheduled on as environment variables:
//!
//! 1. On Pod CREATE, [`mutation`] generates a ConfigMap name, prepends an
//!    `envFrom` reference to it on every container, and injects an init
//!    container that calls back into this webhook.
//! 2. The init container POSTs to `/sync-pod`, and [`sync`] writes the node's
//!    labels into that ConfigMap before the application containers start.
//!
//! # Modules
//!
//! - [`mutation`] - JSON Patch generation for pods
//! - [`admission`] - AdmissionReview validation and response building
//! - [`sync`] - node label to ConfigMap sync
//! - [`server`] - axum router and server lifecycle
//! - [`config`] - webhook configuration
//! - [`error`] - error types

pub mod admission;
pub mod config;
pub mod error;
pub mod mutation;
pub mod server;
pub mod sync;

pub use config::WebhookConfig;
pub use error::{Error, Result};
pub use mutation::{mutate_pod_admission, InjectionSettings};
