use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("section {0} does not exist")]
    NoSuchSection(usize),
    #[error("section {section} has no page {page}")]
    NoSuchPage { section: usize, page: usize },
    #[error("image pages are {image} bytes, frame is {frame}")]
    PageSizeMismatch { image: usize, frame: usize },
}

/// A loadable section of an executable, in whole pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub first_vpn: usize,
    pub num_pages: usize,
    pub read_only: bool,
}

impl Section {
    pub fn contains(&self, vpn: usize) -> bool {
        vpn >= self.first_vpn && vpn < self.first_vpn + self.num_pages
    }
}

/// The executable image a process was created from. Pages are pulled from
/// it one at a time as they fault in.
pub trait Executable: Send + Sync {
    fn sections(&self) -> &[Section];

    /// Fill `frame` with page `page` of section `section`.
    fn load_page(&self, section: usize, page: usize, frame: &mut [u8]) -> Result<(), ImageError>;

    /// Pages spanned by the image, counted from vpn 0.
    fn num_pages(&self) -> usize {
        self.sections()
            .iter()
            .map(|s| s.first_vpn + s.num_pages)
            .max()
            .unwrap_or(0)
    }

    /// The section covering `vpn`, with its index.
    fn locate(&self, vpn: usize) -> Option<(usize, &Section)> {
        self.sections()
            .iter()
            .enumerate()
            .find(|(_, s)| s.contains(vpn))
    }
}

/// An executable held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryImage {
    page_size: usize,
    sections: Vec<Section>,
    contents: Vec<Vec<u8>>,
}

impl MemoryImage {
    pub fn new(page_size: usize) -> Self {
        MemoryImage {
            page_size,
            sections: Vec::new(),
            contents: Vec::new(),
        }
    }

    /// Append a section directly after the previous one.
    pub fn with_section(self, name: &str, contents: impl Into<Vec<u8>>, read_only: bool) -> Self {
        let first_vpn = self
            .sections
            .last()
            .map_or(0, |s| s.first_vpn + s.num_pages);
        self.with_section_at(name, first_vpn, contents, read_only)
    }

    pub fn with_section_at(
        mut self,
        name: &str,
        first_vpn: usize,
        contents: impl Into<Vec<u8>>,
        read_only: bool,
    ) -> Self {
        let contents = contents.into();
        let num_pages = (contents.len() + self.page_size - 1) / self.page_size;
        self.sections.push(Section {
            name: name.to_string(),
            first_vpn,
            num_pages,
            read_only,
        });
        self.contents.push(contents);
        self
    }
}

impl Executable for MemoryImage {
    fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn load_page(&self, section: usize, page: usize, frame: &mut [u8]) -> Result<(), ImageError> {
        if frame.len() != self.page_size {
            return Err(ImageError::PageSizeMismatch {
                image: self.page_size,
                frame: frame.len(),
            });
        }
        let contents = self
            .contents
            .get(section)
            .ok_or(ImageError::NoSuchSection(section))?;
        if page >= self.sections[section].num_pages {
            return Err(ImageError::NoSuchPage { section, page });
        }
        let start = page * self.page_size;
        let end = contents.len().min(start + self.page_size);
        let len = end - start;
        frame[..len].copy_from_slice(&contents[start..end]);
        frame[len..].fill(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_are_laid_out_contiguously() {
        let image = MemoryImage::new(16)
            .with_section(".text", vec![1; 40], true)
            .with_section(".data", vec![2; 16], false);
        let sections = image.sections();
        assert_eq!(sections[0].first_vpn, 0);
        assert_eq!(sections[0].num_pages, 3);
        assert_eq!(sections[1].first_vpn, 3);
        assert_eq!(sections[1].num_pages, 1);
        assert_eq!(image.num_pages(), 4);
    }

    #[test]
    fn locate_finds_section() {
        let image = MemoryImage::new(16)
            .with_section(".text", vec![1; 32], true)
            .with_section(".data", vec![2; 16], false);
        assert_eq!(image.locate(1).map(|(i, _)| i), Some(0));
        assert_eq!(image.locate(2).map(|(i, s)| (i, s.read_only)), Some((1, false)));
        assert!(image.locate(3).is_none());
    }

    #[test]
    fn last_page_is_zero_padded() {
        let image = MemoryImage::new(16).with_section(".text", vec![7; 20], true);
        let mut frame = [0xff; 16];
        image.load_page(0, 1, &mut frame).unwrap();
        assert_eq!(&frame[..4], &[7; 4]);
        assert_eq!(&frame[4..], &[0; 12]);
    }

    #[test]
    fn out_of_range_pages() {
        let image = MemoryImage::new(16).with_section(".text", vec![7; 16], true);
        let mut frame = [0; 16];
        assert_eq!(
            image.load_page(0, 1, &mut frame),
            Err(ImageError::NoSuchPage { section: 0, page: 1 })
        );
        assert_eq!(
            image.load_page(1, 0, &mut frame),
            Err(ImageError::NoSuchSection(1))
        );
    }

    #[test]
    fn frame_must_match_page_size() {
        let image = MemoryImage::new(32).with_section(".text", vec![7; 32], true);
        let mut small = [0; 16];
        assert_eq!(
            image.load_page(0, 0, &mut small),
            Err(ImageError::PageSizeMismatch { image: 32, frame: 16 })
        );
        let mut large = [0xff; 64];
        assert_eq!(
            image.load_page(0, 0, &mut large),
            Err(ImageError::PageSizeMismatch { image: 32, frame: 64 })
        );
        assert_eq!(large, [0xff; 64]);
    }
}
