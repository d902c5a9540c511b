//! # Boot Handoff
//!
//! What the bootstrap leaves behind once paging is on.

use crate::memory::{KERNEL_BASE, PAGE_SIZE};
use crate::segments::{USER_CODE_SELECTOR, USER_DATA_SELECTOR};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use utils_accessors_derive::Accessors;

/// Handoff record from the bootstrap to the memory core.
///
/// Keep this `#[repr(C)]`: the bootstrap writes it from assembly.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Accessors)]
pub struct BootHandoff {
    /// Physical address of the active page directory (CR3).
    page_directory: PhysicalAddress,

    /// First physical byte nobody uses yet. New frames are carved from here.
    free_watermark: PhysicalAddress,

    /// End of installed RAM (exclusive).
    memory_end: PhysicalAddress,

    /// First virtual byte past the mapped kernel image.
    kernel_image_end: VirtualAddress,

    /// Code selector for user privilege.
    user_code_selector: u16,

    /// Data selector for user privilege (also used for the stack).
    user_data_selector: u16,
}

/// Reasons a [`BootHandoff`] is rejected.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum HandoffError {
    #[error("page directory {0} is not page aligned")]
    UnalignedDirectory(PhysicalAddress),
    #[error("free watermark {0} is not page aligned")]
    UnalignedWatermark(PhysicalAddress),
    #[error("free watermark {watermark} lies beyond the end of memory {end}")]
    WatermarkBeyondMemory {
        watermark: PhysicalAddress,
        end: PhysicalAddress,
    },
    #[error("kernel image end {0} lies below the kernel base")]
    KernelImageBelowBase(VirtualAddress),
}

impl BootHandoff {
    /// Handoff with the default user selectors.
    #[must_use]
    pub const fn new(
        page_directory: PhysicalAddress,
        free_watermark: PhysicalAddress,
        memory_end: PhysicalAddress,
        kernel_image_end: VirtualAddress,
    ) -> Self {
        Self {
            page_directory,
            free_watermark,
            memory_end,
            kernel_image_end,
            user_code_selector: USER_CODE_SELECTOR,
            user_data_selector: USER_DATA_SELECTOR,
        }
    }

    /// Sanity-check the record.
    ///
    /// # Errors
    /// See [`HandoffError`].
    pub const fn validate(&self) -> Result<(), HandoffError> {
        if !self.page_directory.is_aligned_to(PAGE_SIZE) {
            return Err(HandoffError::UnalignedDirectory(self.page_directory));
        }
        if !self.free_watermark.is_aligned_to(PAGE_SIZE) {
            return Err(HandoffError::UnalignedWatermark(self.free_watermark));
        }
        if self.free_watermark.as_u32() > self.memory_end.as_u32() {
            return Err(HandoffError::WatermarkBeyondMemory {
                watermark: self.free_watermark,
                end: self.memory_end,
            });
        }
        if self.kernel_image_end.as_u32() < KERNEL_BASE {
            return Err(HandoffError::KernelImageBelowBase(self.kernel_image_end));
        }
        Ok(())
    }

    /// Number of frames between the watermark and the end of memory.
    #[must_use]
    pub const fn free_frames(&self) -> u32 {
        (self.memory_end.as_u32() - self.free_watermark.as_u32()) / PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handoff() -> BootHandoff {
        BootHandoff::new(
            PhysicalAddress::new(0x0010_0000),
            PhysicalAddress::new(0x0020_0000),
            PhysicalAddress::new(0x0100_0000),
            VirtualAddress::new(0xC010_0000),
        )
    }

    #[test]
    fn default_record_is_valid() {
        let h = handoff();
        assert_eq!(h.validate(), Ok(()));
        assert_eq!(h.user_code_selector(), 0x23);
        assert_eq!(h.user_data_selector(), 0x2B);
        assert_eq!(h.free_frames(), 0xE00);
    }

    #[test]
    fn rejects_misplaced_watermark() {
        let h = handoff().with_free_watermark(PhysicalAddress::new(0x0200_0000));
        assert!(matches!(
            h.validate(),
            Err(HandoffError::WatermarkBeyondMemory { .. })
        ));

        let h = handoff().with_free_watermark(PhysicalAddress::new(0x0020_0010));
        assert!(matches!(h.validate(), Err(HandoffError::UnalignedWatermark(_))));
    }

    #[test]
    fn rejects_unaligned_directory() {
        let mut h = handoff();
        h.set_page_directory(PhysicalAddress::new(0x1234));
        assert!(matches!(h.validate(), Err(HandoffError::UnalignedDirectory(_))));
    }
}
