//! # Stepboard
//!
//! Reads daily step counts off fitness-app screenshots and keeps one
//! authoritative record per person per calendar day.
//!
//! Screenshots come from two kinds of apps: smartband companion apps with a
//! fixed layout, and free-form health apps in English, Indonesian, Malay,
//! Thai, or Chinese. OCR text is normalized, stripped of numbers that only
//! look like step counts (clock times, goals, averages, transfer rates), and
//! searched for the day's total. A day's record only ever moves upward.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌───────────┐   ┌────────────┐   ┌──────────┐
//! │  Upload  │──▶│   OCR   │──▶│  Extract  │──▶│ Reconcile  │──▶│  SQLite  │
//! │ CLI/HTTP │   │tesseract│   │ norm+strip│   │ max per day│   │          │
//! └──────────┘   └─────────┘   └───────────┘   └────────────┘   └────┬─────┘
//!                                                                     │
//!                                             leaderboard / history ◀─┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! stepboard init
//! stepboard ingest shot.png --name alice
//! stepboard leaderboard
//! stepboard serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`normalize`] | OCR token joining and normalization |
//! | [`distractor`] | Removal of numbers that are not the day's total |
//! | [`extract`] | Tiered step-count extraction |
//! | [`reconcile`] | Max-per-day record reconciliation |
//! | [`ocr`] | External OCR engine |
//! | [`preprocess`] | Screenshot thresholding before OCR |
//! | [`upload`] | Upload validation and storage |
//! | [`pipeline`] | Upload to record orchestration |
//! | [`store`] | Record storage trait and backends |
//! | [`report`] | Leaderboard and history output |
//! | [`ingest`] | CLI ingestion and extraction |
//! | [`backup`] | Database backup and restore |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod backup;
pub mod config;
pub mod db;
pub mod distractor;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod ocr;
pub mod pipeline;
pub mod preprocess;
pub mod reconcile;
pub mod report;
pub mod server;
pub mod store;
pub mod upload;
