//! Framebuffer completeness rules shared by every backend

use super::traits::TextureHandle;
use super::types::{BackendLimits, FramebufferDescriptor, FramebufferStatus, TextureInfo, TextureUsage};

/// Check a framebuffer's attachments against each other and the device limits.
///
/// Color attachments come first in attachment order, the depth attachment
/// (if any) is reported with the index after the last color attachment.
pub fn validate_framebuffer<F>(
    desc: &FramebufferDescriptor,
    limits: &BackendLimits,
    lookup: F,
) -> FramebufferStatus
where
    F: Fn(TextureHandle) -> Option<TextureInfo>,
{
    if desc.color_attachments.is_empty() && desc.depth_attachment.is_none() {
        return FramebufferStatus::MissingAttachment;
    }
    if desc.color_attachments.len() > limits.max_color_attachments as usize {
        return FramebufferStatus::Unsupported;
    }

    let mut extent: Option<(u32, u32)> = None;
    let attachments = desc
        .color_attachments
        .iter()
        .map(|texture| (*texture, false))
        .chain(desc.depth_attachment.map(|texture| (texture, true)));

    for (index, (texture, is_depth_slot)) in attachments.enumerate() {
        let Some(info) = lookup(texture) else {
            return FramebufferStatus::IncompleteAttachment { index };
        };
        if !info.usage.contains(TextureUsage::RENDER_ATTACHMENT)
            || info.format.is_depth() != is_depth_slot
        {
            return FramebufferStatus::IncompleteAttachment { index };
        }
        if info.width == 0 || info.height == 0 {
            return FramebufferStatus::IncompleteDimensions;
        }
        match extent {
            None => extent = Some((info.width, info.height)),
            Some(size) if size != (info.width, info.height) => {
                return FramebufferStatus::IncompleteDimensions;
            }
            Some(_) => {}
        }
    }

    FramebufferStatus::Complete
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::TextureFormat;
    use std::collections::HashMap;

    fn target(width: u32, height: u32, format: TextureFormat) -> TextureInfo {
        TextureInfo {
            width,
            height,
            format,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        }
    }

    fn check(textures: &HashMap<u64, TextureInfo>, desc: &FramebufferDescriptor) -> FramebufferStatus {
        validate_framebuffer(desc, &BackendLimits::default(), |handle| {
            textures.get(&handle.0).copied()
        })
    }

    #[test]
    fn test_complete_color_and_depth() {
        let textures = HashMap::from([
            (1, target(64, 32, TextureFormat::Rgba32Float)),
            (2, target(64, 32, TextureFormat::Rgba32Float)),
            (3, target(64, 32, TextureFormat::Depth32Float)),
        ]);
        let desc = FramebufferDescriptor {
            label: None,
            color_attachments: vec![TextureHandle(1), TextureHandle(2)],
            depth_attachment: Some(TextureHandle(3)),
        };
        assert_eq!(check(&textures, &desc), FramebufferStatus::Complete);
    }

    #[test]
    fn test_depth_only_is_complete() {
        let textures = HashMap::from([(3, target(256, 256, TextureFormat::Depth32Float))]);
        let desc = FramebufferDescriptor {
            depth_attachment: Some(TextureHandle(3)),
            ..Default::default()
        };
        assert_eq!(check(&textures, &desc), FramebufferStatus::Complete);
    }

    #[test]
    fn test_empty_is_missing_attachment() {
        let textures = HashMap::new();
        assert_eq!(
            check(&textures, &FramebufferDescriptor::default()),
            FramebufferStatus::MissingAttachment
        );
    }

    #[test]
    fn test_mismatched_sizes() {
        let textures = HashMap::from([
            (1, target(64, 32, TextureFormat::Rgba32Float)),
            (2, target(32, 32, TextureFormat::Rgba32Float)),
        ]);
        let desc = FramebufferDescriptor {
            color_attachments: vec![TextureHandle(1), TextureHandle(2)],
            ..Default::default()
        };
        assert_eq!(check(&textures, &desc), FramebufferStatus::IncompleteDimensions);
    }

    #[test]
    fn test_released_attachment_is_incomplete() {
        let textures = HashMap::from([(1, target(64, 32, TextureFormat::Rgba32Float))]);
        let desc = FramebufferDescriptor {
            color_attachments: vec![TextureHandle(1), TextureHandle(9)],
            ..Default::default()
        };
        assert_eq!(
            check(&textures, &desc),
            FramebufferStatus::IncompleteAttachment { index: 1 }
        );
    }

    #[test]
    fn test_depth_format_in_color_slot() {
        let textures = HashMap::from([(1, target(8, 8, TextureFormat::Depth32Float))]);
        let desc = FramebufferDescriptor {
            color_attachments: vec![TextureHandle(1)],
            ..Default::default()
        };
        assert_eq!(
            check(&textures, &desc),
            FramebufferStatus::IncompleteAttachment { index: 0 }
        );
    }

    #[test]
    fn test_sampled_only_texture_is_not_attachable() {
        let mut info = target(8, 8, TextureFormat::Rgba8Unorm);
        info.usage = TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST;
        let textures = HashMap::from([(1, info)]);
        let desc = FramebufferDescriptor {
            color_attachments: vec![TextureHandle(1)],
            ..Default::default()
        };
        assert_eq!(
            check(&textures, &desc),
            FramebufferStatus::IncompleteAttachment { index: 0 }
        );
    }

    #[test]
    fn test_too_many_color_attachments() {
        let textures: HashMap<u64, TextureInfo> = (0..9)
            .map(|i| (i, target(4, 4, TextureFormat::Rgba8Unorm)))
            .collect();
        let desc = FramebufferDescriptor {
            color_attachments: (0..9).map(TextureHandle).collect(),
            ..Default::default()
        };
        assert_eq!(check(&textures, &desc), FramebufferStatus::Unsupported);
    }
}
