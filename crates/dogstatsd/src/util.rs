// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Sorts a tag list in place and removes exact duplicates so downstream
/// identity derivation is independent of the order tags arrived in.
pub fn sort_uniq(mut tags: Vec<String>) -> Vec<String> {
    tags.sort_unstable();
    tags.dedup();
    tags
}
