// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parsing and writing of H.264 bitstreams.
//!
//! The crate decodes the high level syntax of H.264 streams (NAL units,
//! parameter sets, slice headers and SEI messages) from both Annex B byte
//! streams and length prefixed (`avcC`) streams. It can also write
//! parameter sets and a subset of SEI messages back into NAL units.

pub mod bitstream_utils;
pub mod codec;
