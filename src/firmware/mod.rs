//! Firmware builder: turns tracker configurations into flashable binaries.
//!
//! ## Overview
//!
//! A client posts a board/IMU/battery configuration against a firmware
//! release. The service fills in board defaults, pins the release to a
//! commit or tag, and either returns an equivalent existing build or starts
//! a new one. A build downloads the source archive, writes the generated
//! `defines.h`, runs PlatformIO and uploads each flash partition to object
//! storage. Progress is pushed to clients over server-sent events.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐  HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ──────> │  server.rs  (router, wiring, graceful shutdown)  │
//! │          │ <────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘   SSE   │         │                                        │
//!                      │         │ BuildService::submit()                 │
//!                      │         v                                        │
//!                      │  service.rs  (state machine, task handles)       │
//!                      │    ├─ normalize.rs  (defaults, virtual boards)   │
//!                      │    ├─ release.rs    (catalog, resolver, cache)   │
//!                      │    ├─ fingerprint.rs (dedup key)                 │
//!                      │    └─ db.rs         (build records, SQLite)      │
//!                      │         │                                        │
//!                      │         │ BuildRunner::run()  (detached task)    │
//!                      │         v                                        │
//!                      │  runner.rs  (scratch dir, download, patch)       │
//!                      │    ├─ defines.rs    (defines.h, debug macros)    │
//!                      │    ├─ toolchain.rs  (PlatformIo subprocess)      │
//!                      │    └─ storage.rs    (ObjectStore uploads)        │
//!                      └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module      | Responsibility                                          |
//! |-------------|---------------------------------------------------------|
//! | `models`    | Shared types: `BuildRequest`, `BuildRecord`, events     |
//! | `boards`    | Per-board pin defaults and the known IMU table          |
//! | `github`    | `SourceControl` over the GitHub REST API                |
//! | `broadcast` | Per-build status fan-out with progress coalescing       |
//! | `sweeper`   | Deletes builds of branches whose head has moved         |

pub mod api;
pub mod boards;
pub mod broadcast;
pub mod db;
pub mod defines;
pub mod fingerprint;
pub mod github;
pub mod models;
pub mod normalize;
pub mod release;
pub mod runner;
pub mod server;
pub mod service;
pub mod storage;
pub mod sweeper;
pub mod toolchain;
