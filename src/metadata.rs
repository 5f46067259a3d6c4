//! The `image_metadata.json` descriptor that OCI reads when importing a
//! custom image from an object-storage tuple.

use crate::error::Result;
use camino::Utf8Path;
use serde_derive::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};

pub(crate) const OPERATING_SYSTEM: &str = "Talos";
pub(crate) const SHAPE: &str = "VM.Standard.A1.Flex";
const PARAVIRTUALIZED: &str = "PARAVIRTUALIZED";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ImageMetadata {
    pub(crate) version: u32,
    pub(crate) external_launch_options: LaunchOptions,
    pub(crate) image_capability_data: Option<serde_json::Value>,
    pub(crate) image_caps_format_version: Option<String>,
    pub(crate) operating_system: String,
    pub(crate) operating_system_version: String,
    pub(crate) additional_metadata: AdditionalMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LaunchOptions {
    pub(crate) firmware: String,
    pub(crate) network_type: String,
    pub(crate) boot_volume_type: String,
    pub(crate) remote_data_volume_type: String,
    pub(crate) local_data_volume_type: String,
    pub(crate) launch_options_source: String,
    pub(crate) pv_attachment_version: u32,
    pub(crate) pv_encryption_in_transit_enabled: bool,
    pub(crate) consistent_volume_naming_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AdditionalMetadata {
    pub(crate) shape_compatibilities: Vec<ShapeCompatibility>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ShapeCompatibility {
    pub(crate) internal_shape_name: String,
    pub(crate) ocpu_constraints: OcpuConstraints,
    pub(crate) memory_constraints: MemoryConstraints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct OcpuConstraints {
    pub(crate) min: u32,
    pub(crate) max: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct MemoryConstraints {
    #[serde(rename = "minInGBs")]
    pub(crate) min_in_gbs: u32,
    #[serde(rename = "maxInGBs")]
    pub(crate) max_in_gbs: u32,
}

impl ImageMetadata {
    /// The fixed descriptor for an ARM64 Talos image of the given version.
    pub(crate) fn for_version(version: impl Into<String>) -> Self {
        Self {
            version: 2,
            external_launch_options: LaunchOptions {
                firmware: "UEFI_64".to_string(),
                network_type: PARAVIRTUALIZED.to_string(),
                boot_volume_type: PARAVIRTUALIZED.to_string(),
                remote_data_volume_type: PARAVIRTUALIZED.to_string(),
                local_data_volume_type: PARAVIRTUALIZED.to_string(),
                launch_options_source: PARAVIRTUALIZED.to_string(),
                pv_attachment_version: 2,
                pv_encryption_in_transit_enabled: true,
                consistent_volume_naming_enabled: true,
            },
            image_capability_data: None,
            image_caps_format_version: None,
            operating_system: OPERATING_SYSTEM.to_string(),
            operating_system_version: version.into(),
            additional_metadata: AdditionalMetadata {
                shape_compatibilities: vec![ShapeCompatibility {
                    internal_shape_name: SHAPE.to_string(),
                    ocpu_constraints: OcpuConstraints { min: 1, max: 80 },
                    memory_constraints: MemoryConstraints {
                        min_in_gbs: 1,
                        max_in_gbs: 512,
                    },
                }],
            },
        }
    }
}

/// Serialize `meta` as compact JSON to `dest`.
pub(crate) fn write_metadata(meta: &ImageMetadata, dest: &Utf8Path) -> Result<()> {
    let mut out = BufWriter::new(File::create(dest)?);
    serde_json::to_writer(&mut out, meta)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_shape() {
        let meta = ImageMetadata::for_version("1.11.5");
        let v = serde_json::to_value(&meta).unwrap();
        let expected = json!({
            "version": 2,
            "externalLaunchOptions": {
                "firmware": "UEFI_64",
                "networkType": "PARAVIRTUALIZED",
                "bootVolumeType": "PARAVIRTUALIZED",
                "remoteDataVolumeType": "PARAVIRTUALIZED",
                "localDataVolumeType": "PARAVIRTUALIZED",
                "launchOptionsSource": "PARAVIRTUALIZED",
                "pvAttachmentVersion": 2,
                "pvEncryptionInTransitEnabled": true,
                "consistentVolumeNamingEnabled": true,
            },
            "imageCapabilityData": null,
            "imageCapsFormatVersion": null,
            "operatingSystem": "Talos",
            "operatingSystemVersion": "1.11.5",
            "additionalMetadata": {
                "shapeCompatibilities": [{
                    "internalShapeName": "VM.Standard.A1.Flex",
                    "ocpuConstraints": {"min": 1, "max": 80},
                    "memoryConstraints": {"minInGBs": 1, "maxInGBs": 512},
                }]
            },
        });
        assert_eq!(v, expected);
    }

    #[test]
    fn test_only_version_varies() {
        let a = serde_json::to_string(&ImageMetadata::for_version("1.11.5")).unwrap();
        let b = serde_json::to_string(&ImageMetadata::for_version("1.12.0")).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.replace("1.11.5", "1.12.0"), b);
        assert!(a.starts_with(r#"{"version":2,"externalLaunchOptions":"#));
    }
}
