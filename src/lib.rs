//! # danci-scheduler
//!
//! Adaptive spaced-repetition scheduling core:
//!
//! - **Forgetting curve** - per-item retention/forgetting estimates, optimal
//!   review interval and the priority score used to order a review queue
//! - **Concept mastery** - keyword concepts aggregated over recent reviews and
//!   classified into mastery categories
//! - **Study streaks** - day-granular continuity state machine with milestones
//! - **Retention** - plain and ease-weighted retention rate over a window
//!
//! Storage is consumed through the [`storage::Repository`] trait; time is
//! injected through [`clock::Clock`].
//!
//! ```rust
//! use danci_scheduler::services::forgetting_curve::{
//!     calculate_personal_forgetting_curve, optimal_review_time,
//! };
//!
//! let curve = calculate_personal_forgetting_curve(&[]);
//! assert_eq!(curve.retention_rate, 0.7);
//! let days = optimal_review_time(&curve, 6.0, 2.5);
//! assert!((1.0..=180.0).contains(&days));
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod sanitize;
pub mod services;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use engine::SchedulerEngine;
pub use error::{SchedulerError, SchedulerResult};
