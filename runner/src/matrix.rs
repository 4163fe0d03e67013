//! The set of build configurations a sweep walks through.
//!
//! Every configured variant is combined with every segment bit-width. The resulting
//! `BuildConfiguration`s are immutable and are handed out in variant order, then bit order.

use crate::config::{SweepConfig, TargetBinary, VariantConfig};
use itertools::{iproduct, Itertools};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// widest bit-width that still yields a representable segment count
pub const MAX_SEGMENT_BITS: u32 = 31;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MatrixError {
    #[error("No variants were defined")]
    NoVariants,
    #[error("No segment bit-widths were defined")]
    NoSegmentBits,
    #[error("Variant {0} is defined more than once")]
    DuplicateVariant(String),
    #[error("Segment bit-width {0} is listed more than once")]
    DuplicateSegmentBits(u32),
    #[error("Segment bit-width {0} exceeds the maximum of {MAX_SEGMENT_BITS}")]
    SegmentBitsTooLarge(u32),
    #[error("Variant {variant} sets toggles for {binary}, which is not a target")]
    UnknownTarget { variant: String, binary: String },
}

/// Which of the two related binaries a target is
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum BinaryRole {
    Baseline,
    TableVariant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfiguration {
    /// unique identifier, also used to derive the workspace path
    pub name: String,
    pub variant: String,
    /// (binary, toggles) in target order
    pub toggles: Vec<(String, Vec<String>)>,
    pub segment_bits: u32,
}

impl BuildConfiguration {
    pub fn segments(&self) -> u64 {
        1u64 << self.segment_bits
    }

    /// one line summary of all toggles, used for logs and the database
    pub fn describe_toggles(&self) -> String {
        self.toggles
            .iter()
            .map(|(binary, toggles)| format!("{binary}={}", toggles.join(";")))
            .join(" ")
    }
}

impl fmt::Display for BuildConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (kNumSegBits={}, segNum={})",
            self.name,
            self.segment_bits,
            self.segments()
        )
    }
}

#[derive(Debug, Clone)]
pub struct ConfigurationMatrix {
    configurations: Vec<BuildConfiguration>,
}

impl ConfigurationMatrix {
    pub fn from_config(config: &SweepConfig) -> Result<Self, MatrixError> {
        Self::new(&config.variants, &config.segment_bits, &config.targets)
    }

    pub fn new(
        variants: &[VariantConfig],
        segment_bits: &[u32],
        targets: &[TargetBinary],
    ) -> Result<Self, MatrixError> {
        if variants.is_empty() {
            return Err(MatrixError::NoVariants);
        }

        if segment_bits.is_empty() {
            return Err(MatrixError::NoSegmentBits);
        }

        if let Some(name) = variants.iter().map(|variant| &variant.name).duplicates().next() {
            return Err(MatrixError::DuplicateVariant(name.clone()));
        }

        if let Some(bits) = segment_bits.iter().duplicates().next() {
            return Err(MatrixError::DuplicateSegmentBits(*bits));
        }

        if let Some(bits) = segment_bits.iter().find(|bits| **bits > MAX_SEGMENT_BITS) {
            return Err(MatrixError::SegmentBitsTooLarge(*bits));
        }

        for variant in variants {
            if let Some(binary) = variant
                .toggles
                .keys()
                .find(|binary| !targets.iter().any(|target| &target.name == *binary))
            {
                return Err(MatrixError::UnknownTarget {
                    variant: variant.name.clone(),
                    binary: binary.clone(),
                });
            }
        }

        let suffixed = segment_bits.len() > 1;
        let configurations = iproduct!(variants.iter(), segment_bits.iter())
            .map(|(variant, bits)| BuildConfiguration {
                name: if suffixed {
                    format!("{}_k{bits}", variant.name)
                } else {
                    variant.name.clone()
                },
                variant: variant.name.clone(),
                toggles: targets
                    .iter()
                    .map(|target| {
                        (
                            target.name.clone(),
                            variant
                                .toggles
                                .get(&target.name)
                                .cloned()
                                .unwrap_or_default(),
                        )
                    })
                    .collect(),
                segment_bits: *bits,
            })
            .collect_vec();

        // "A_k1" as a variant name collides with variant "A" at bit-width 1
        if let Some(name) = configurations
            .iter()
            .map(|configuration| &configuration.name)
            .duplicates()
            .next()
        {
            return Err(MatrixError::DuplicateVariant(name.clone()));
        }

        Ok(Self { configurations })
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuildConfiguration> {
        self.configurations.iter()
    }

    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.configurations
            .iter()
            .map(|configuration| configuration.name.as_str())
            .collect()
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&BuildConfiguration> {
        self.configurations
            .iter()
            .find(|configuration| configuration.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn targets() -> Vec<TargetBinary> {
        vec![
            TargetBinary {
                name: "mylru_tests_mt".to_owned(),
                role: BinaryRole::Baseline,
                ingest: "gtest".to_owned(),
            },
            TargetBinary {
                name: "mylru_tests_mt_ht".to_owned(),
                role: BinaryRole::TableVariant,
                ingest: "gtest".to_owned(),
            },
        ]
    }

    fn variant(name: &str, toggles: &[(&str, Vec<&str>)]) -> VariantConfig {
        VariantConfig {
            name: name.to_owned(),
            toggles: toggles
                .iter()
                .map(|(binary, toggles)| {
                    (
                        binary.to_string(),
                        toggles.iter().map(|toggle| toggle.to_string()).collect(),
                    )
                })
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn single_bit_width_keeps_variant_names() {
        let variants = vec![
            variant(
                "NoResizer_Libcuckoo",
                &[
                    ("mylru_tests_mt", vec!["PRE_ALLOCATE", "USE_LIBCUCKOO"]),
                    (
                        "mylru_tests_mt_ht",
                        vec!["PRE_ALLOCATE", "USE_LIBCUCKOO", "USE_HHVM"],
                    ),
                ],
            ),
            variant("NoResizer_MyHashTable", &[]),
        ];
        let matrix = ConfigurationMatrix::new(&variants, &[4], &targets()).unwrap();

        assert_eq!(
            matrix.names(),
            vec!["NoResizer_Libcuckoo", "NoResizer_MyHashTable"]
        );

        let first = matrix.get("NoResizer_Libcuckoo").unwrap();
        assert_eq!(first.segments(), 16);
        assert_eq!(
            first.toggles[1],
            (
                "mylru_tests_mt_ht".to_owned(),
                vec![
                    "PRE_ALLOCATE".to_owned(),
                    "USE_LIBCUCKOO".to_owned(),
                    "USE_HHVM".to_owned()
                ]
            )
        );
        // every target gets an entry, even without toggles
        assert_eq!(
            matrix.get("NoResizer_MyHashTable").unwrap().toggles[0],
            ("mylru_tests_mt".to_owned(), Vec::new())
        );
    }

    #[test]
    fn bit_sweep_suffixes_names_in_order() {
        let variants = vec![variant("Seg", &[])];
        let matrix = ConfigurationMatrix::new(&variants, &[0, 1, 2], &targets()).unwrap();

        assert_eq!(matrix.names(), vec!["Seg_k0", "Seg_k1", "Seg_k2"]);
        assert_eq!(matrix.get("Seg_k2").unwrap().segment_bits, 2);
        assert_eq!(
            matrix.iter().map(BuildConfiguration::segments).collect_vec(),
            vec![1, 2, 4]
        );
    }

    #[test]
    fn rejects_invalid_matrices() {
        let targets = targets();

        assert_eq!(
            ConfigurationMatrix::new(&[variant("A", &[]), variant("A", &[])], &[4], &targets)
                .unwrap_err(),
            MatrixError::DuplicateVariant("A".to_owned())
        );
        assert_eq!(
            ConfigurationMatrix::new(&[variant("A", &[])], &[4, 4], &targets).unwrap_err(),
            MatrixError::DuplicateSegmentBits(4)
        );
        assert_eq!(
            ConfigurationMatrix::new(&[variant("A", &[])], &[32], &targets).unwrap_err(),
            MatrixError::SegmentBitsTooLarge(32)
        );
        assert_eq!(
            ConfigurationMatrix::new(&[], &[4], &targets).unwrap_err(),
            MatrixError::NoVariants
        );
        assert!(matches!(
            ConfigurationMatrix::new(&[variant("A", &[("other", vec!["X"])])], &[4], &targets),
            Err(MatrixError::UnknownTarget { .. })
        ));
    }
}
