// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

//! wings-sandbox: path-safe, quota-accounted filesystem for one server's
//! data directory, plus tar+gzip archive create/extract over it.

pub mod archiver;
pub mod denylist;
pub mod error;
pub mod fs;
pub mod quota;
pub mod resolve;

pub use archiver::{Archiver, CreateOptions, GzipLevel, Progress};
pub use denylist::Denylist;
pub use error::{SandboxError, SandboxResult};
pub use fs::{DirEntry, Owner, SandboxFs};
pub use quota::QuotaLimit;
