/*
 * SPDX-FileCopyrightText: 2024 The wipt Authors
 * SPDX-License-Identifier: GPL-3.0-only
 */

pub mod args;
pub mod assets;
pub mod completion;
pub mod extract;
pub mod patch;
