use std::{collections::BTreeSet, fmt};

/**
    A set of EGL or GL extension names.
*/
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtensionSet {
    names: BTreeSet<String>,
}

impl ExtensionSet {
    /**
        Parse a space-separated extension string as returned by
        `eglQueryString` or `glGetString`.
    */
    pub fn parse(list: &str) -> Self {
        list.split_ascii_whitespace().map(str::to_string).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /**
        Returns true if every name in `names` is present.
    */
    pub fn contains_all(&self, names: &[&str]) -> bool {
        names.iter().all(|name| self.contains(name))
    }

    /**
        Returns true if at least one name in `names` is present.
    */
    pub fn contains_any(&self, names: &[&str]) -> bool {
        names.iter().any(|name| self.contains(name))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl FromIterator<String> for ExtensionSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().filter(|name| !name.is_empty()).collect(),
        }
    }
}

impl fmt::Display for ExtensionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, name) in self.names.iter().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }
            f.write_str(name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_query() {
        let set = ExtensionSet::parse(
            "EGL_KHR_image_base  EGL_EXT_image_dma_buf_import\nEGL_KHR_gl_texture_2D_image ",
        );
        assert_eq!(set.len(), 3);
        assert!(set.contains("EGL_EXT_image_dma_buf_import"));
        assert!(!set.contains("EGL_EXT_image_dma_buf"));
        assert!(set.contains_all(&["EGL_KHR_image_base", "EGL_KHR_gl_texture_2D_image"]));
        assert!(!set.contains_all(&["EGL_KHR_image_base", "EGL_KHR_image_pixmap"]));
        assert!(set.contains_any(&["EGL_KHR_image_pixmap", "EGL_KHR_image_base"]));
    }

    #[test]
    fn empty_input() {
        assert!(ExtensionSet::parse("").is_empty());
        assert!(ExtensionSet::parse("   ").is_empty());
        assert!(!ExtensionSet::default().contains_any(&["GL_OES_EGL_image"]));
    }

    #[test]
    fn display_is_sorted() {
        let set = ExtensionSet::parse("b a c");
        assert_eq!(set.to_string(), "a b c");
    }
}
