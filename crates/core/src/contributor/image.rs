//! Contributors carrying pixel data captured from the document.
//!
//! Images are base64-encoded PNG strings; capturing them is the host's job.

use serde_json::Value;

use super::Contributor;
use crate::instructions::{instructions_fragment, ProcessingInstructions};
use crate::settings::{keys, SettingsStore};
use crate::types::{LayerId, Mapping, Size};

/// Layer name given to upscaled results.
pub const UPSCALED_LAYER_NAME: &str = "Upscaled";

// ---------------------------------------------------------------------------
// Init image
// ---------------------------------------------------------------------------

/// The source image for img2img.
#[derive(Debug, Clone)]
pub struct InitImage {
    pub image: String,
}

impl InitImage {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }
}

impl Contributor for InitImage {
    fn name(&self) -> &str {
        "init_image"
    }

    fn snapshot(&mut self) -> Mapping {
        let mut data = Mapping::new();
        data.insert("img2img_img".into(), Value::from(self.image.as_str()));
        data
    }
}

// ---------------------------------------------------------------------------
// Inpaint mask
// ---------------------------------------------------------------------------

/// Inpainting source image, mask and mask options.
///
/// When the mask came from a layer, that layer becomes the anchor for the
/// results and is listed for visibility restoration, since the host hides it
/// while capturing the image underneath.
#[derive(Debug, Clone)]
pub struct InpaintMask {
    pub image: Option<String>,
    pub mask: Option<String>,
    pub mask_layer: Option<LayerId>,
    pub mask_blur: u32,
    /// 0 inpaints the masked area, 1 the unmasked area.
    pub mask_mode: u32,
    /// 0 fill, 1 original, 2 latent noise, 3 latent nothing.
    pub masked_content: u32,
    /// 0 whole picture, 1 only masked.
    pub inpaint_area: u32,
    pub padding: u32,
}

impl InpaintMask {
    pub fn from_settings(
        store: &dyn SettingsStore,
        image: Option<String>,
        mask: Option<String>,
        mask_layer: Option<LayerId>,
    ) -> Self {
        Self {
            image,
            mask,
            mask_layer,
            mask_blur: keys::INPAINT_MASK_BLUR.get_or_default(store),
            mask_mode: keys::INPAINT_MASK_MODE.get_or_default(store),
            masked_content: keys::INPAINT_MASKED_CONTENT.get_or_default(store),
            inpaint_area: keys::INPAINT_AREA.get_or_default(store),
            padding: keys::INPAINT_PADDING.get_or_default(store),
        }
    }
}

impl Contributor for InpaintMask {
    fn name(&self) -> &str {
        "inpaint_mask"
    }

    fn snapshot(&mut self) -> Mapping {
        let mut data = Mapping::new();
        data.insert("mask_blur".into(), self.mask_blur.into());
        data.insert("inpainting_mask_invert".into(), self.mask_mode.into());
        data.insert("inpainting_fill".into(), self.masked_content.into());
        data.insert("inpaint_full_res".into(), self.inpaint_area.into());
        data.insert("inpaint_full_res_padding".into(), self.padding.into());
        if let Some(image) = &self.image {
            data.insert("inpaint_img".into(), Value::from(image.as_str()));
        }
        if let Some(mask) = &self.mask {
            data.insert("mask_img".into(), Value::from(mask.as_str()));
        }
        if let Some(layer) = self.mask_layer {
            let instructions = ProcessingInstructions {
                anchor_layer: Some(layer),
                restore_visibility: vec![layer],
                ..Default::default()
            };
            data.extend(instructions_fragment(&instructions));
        }
        data
    }
}

// ---------------------------------------------------------------------------
// Upscale
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpscaleMode {
    /// Multiply both sides by a factor.
    By(f64),
    /// Resize to an explicit size, optionally cropping to keep the aspect.
    To { size: Size, crop: bool },
}

/// An extras request upscaling one image.
#[derive(Debug, Clone)]
pub struct Upscale {
    pub upscaler: String,
    pub mode: UpscaleMode,
    pub image: String,
    /// Size of the region the image was captured from.
    pub source: Size,
}

impl Upscale {
    pub fn from_settings(store: &dyn SettingsStore, by_factor: bool, image: String, source: Size) -> Self {
        let mode = if by_factor {
            UpscaleMode::By(keys::UPSCALE_RESIZE.get_or_default(store))
        } else {
            UpscaleMode::To {
                size: Size::new(
                    keys::UPSCALE_WIDTH.get_or_default(store),
                    keys::UPSCALE_HEIGHT.get_or_default(store),
                ),
                crop: keys::UPSCALE_CROP_TO_FIT.get_or_default(store),
            }
        };
        Self {
            upscaler: keys::UPSCALER.get_or_default(store),
            mode,
            image,
            source,
        }
    }

    /// Size the upscaled result occupies in the document.
    pub fn output_size(&self) -> Size {
        match self.mode {
            UpscaleMode::By(factor) => Size::new(
                (f64::from(self.source.width) * factor) as u32,
                (f64::from(self.source.height) * factor) as u32,
            ),
            UpscaleMode::To { size, .. } => size,
        }
    }
}

impl Contributor for Upscale {
    fn name(&self) -> &str {
        "upscale"
    }

    fn snapshot(&mut self) -> Mapping {
        let mut data = Mapping::new();
        match self.mode {
            UpscaleMode::By(factor) => {
                data.insert("resize_mode".into(), 0u8.into());
                data.insert("upscaling_resize".into(), factor.into());
            }
            UpscaleMode::To { size, crop } => {
                data.insert("resize_mode".into(), 1u8.into());
                data.insert("upscaling_resize_w".into(), size.width.into());
                data.insert("upscaling_resize_h".into(), size.height.into());
                data.insert("upscaling_crop".into(), crop.into());
            }
        }
        data.insert("upscaler_1".into(), Value::from(self.upscaler.as_str()));
        data.insert("image".into(), Value::from(self.image.as_str()));

        let instructions = ProcessingInstructions {
            place_size: Some(self.output_size()),
            layer_name: Some(UPSCALED_LAYER_NAME.to_string()),
            ..Default::default()
        };
        data.extend(instructions_fragment(&instructions));
        data
    }
}

// ---------------------------------------------------------------------------
// Interrogate
// ---------------------------------------------------------------------------

/// Ask the service to caption an image.
#[derive(Debug, Clone)]
pub struct Interrogation {
    pub model: String,
    pub image: String,
    pub size: Size,
}

impl Interrogation {
    pub fn from_settings(store: &dyn SettingsStore, image: String, size: Size) -> Self {
        Self {
            model: keys::INTERROGATE_MODEL.get_or_default(store),
            image,
            size,
        }
    }
}

impl Contributor for Interrogation {
    fn name(&self) -> &str {
        "interrogate"
    }

    fn snapshot(&mut self) -> Mapping {
        let mut data = Mapping::new();
        data.insert("model".into(), Value::from(self.model.as_str()));
        data.insert("image".into(), Value::from(self.image.as_str()));
        data.insert("width".into(), self.size.width.into());
        data.insert("height".into(), self.size.height.into());
        data
    }
}
