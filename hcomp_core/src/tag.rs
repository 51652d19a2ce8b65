//! Tag/reference keys and special-element markers.

/// Type class of a stored element.
pub type Tag = u16;
/// Instance id of a stored element within its tag.
pub type Ref = u16;

/// Never a valid element tag; marks free directory slots.
pub const DFTAG_NULL: Tag = 0;
/// Tag of the element holding a compressed element's encoded bytes.
pub const DFTAG_COMPRESSED: Tag = 40;

/// Special-element marker stored at the start of a special header: linked blocks.
pub const SPECIAL_LINKED: i16 = 1;
/// Special-element marker: data stored in an external file.
pub const SPECIAL_EXT: i16 = 2;
/// Special-element marker: compressed element.
pub const SPECIAL_COMP: i16 = 3;

const SPECIAL_BIT: Tag = 0x4000;
const RESERVED_BIT: Tag = 0x8000;

/// Tag under which the special version of `tag` is filed.
pub fn special_tag(tag: Tag) -> Tag {
    (tag & !RESERVED_BIT) | SPECIAL_BIT
}

pub fn is_special(tag: Tag) -> bool {
    tag & RESERVED_BIT == 0 && tag & SPECIAL_BIT != 0
}

/// Plain tag a special tag was derived from; plain tags map to themselves.
pub fn base_tag(tag: Tag) -> Tag {
    if is_special(tag) {
        tag & !SPECIAL_BIT
    } else {
        tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_round_trip() {
        let tag = 702;
        let special = special_tag(tag);
        assert_eq!(special, 0x4000 | 702);
        assert!(is_special(special));
        assert!(!is_special(tag));
        assert_eq!(base_tag(special), tag);
        assert_eq!(base_tag(tag), tag);
    }

    #[test]
    fn reserved_range_is_never_special() {
        assert!(!is_special(0xc000 | 5));
        assert_eq!(special_tag(0x8000 | 5), 0x4000 | 5);
    }
}
