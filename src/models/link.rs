//! Hypermedia links rendered next to objects.

use serde::Serialize;

use super::derived::DerivedVariant;
use super::object::Object;

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub rel: String,
    pub href: String,
}

impl Link {
    fn new(rel: &str, href: String) -> Self {
        Self {
            rel: rel.to_string(),
            href,
        }
    }
}

/// Links for an object.
///
/// Variant links are emitted only once the variant is flagged as present,
/// so a response never points at a thumbnail that is still being generated.
pub fn links_for(base_url: &str, object: &Object) -> Vec<Link> {
    let base = base_url.trim_end_matches('/');
    let file_href = format!("{}/{}/{}", base, object.bin, object.filename);

    let mut links = vec![
        Link::new("file", file_href.clone()),
        Link::new("bin", format!("{}/{}", base, object.bin)),
    ];

    if object.has_derived(DerivedVariant::Thumbnail) {
        let v = DerivedVariant::Thumbnail;
        links.push(Link::new(
            "thumbnail",
            format!("{}?width={}&height={}", file_href, v.width(), v.height()),
        ));
    }

    if object.has_derived(DerivedVariant::Preview) {
        links.push(Link::new(
            "album item",
            format!("{}?width={}", file_href, DerivedVariant::Preview.width()),
        ));
        links.push(Link::new("album", format!("{}/album/{}", base, object.bin)));
    }

    links
}
