/*
 * SPDX-FileCopyrightText: 2024 The wipt Authors
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Converting between a firmware container and the raw boot image inside it.
//! [`unwrap`] and [`rewrap`] mirror each other and both dispatch on
//! [`ContainerKind`].

pub mod rewrap;
pub mod unwrap;

use std::path::PathBuf;

pub use crate::format::container::{ContainerKind, detect};

/// A raw boot image pulled out of its container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedImage {
    /// Location of the raw image inside the workspace.
    pub raw_image: PathBuf,
    pub origin: ContainerKind,
    /// Full name of the archive member the image came from. Only set for
    /// archive containers.
    pub member_name: Option<String>,
}
