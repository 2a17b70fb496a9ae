/*
 * SPDX-FileCopyrightText: 2024 The wipt Authors
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! wipt unwraps a boot firmware file (raw image, LZ4 image, tar or LZ4 tar),
//! roots the boot image inside it with Magisk's `magiskboot`, and puts the
//! result back into the same kind of container.
//!
//! The CLI source files use concrete types wherever possible for simplicity,
//! while the "library"-style source files aim to be generic.

pub mod cli;
pub mod container;
pub mod format;
pub mod job;
pub mod log;
pub mod patch;
pub mod stream;
pub mod util;
pub mod workflow;
pub mod workspace;
