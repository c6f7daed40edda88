use crate::binding::RenderItem;

/// Decide which items land on `page_number` (1-based) and localize their
/// y-coordinate.
///
/// Two authoring conventions coexist across the schema families and there
/// is no per-schema flag: some tag every item with an explicit page and a
/// page-local y, others carry a single continuous y measured from the top
/// of page 1. The rule, per item:
///
/// 1. explicit page tag, y within one page: match the tag, keep y;
/// 2. explicit page tag but y overflows the page height: the tag is
///    stale, reinterpret y as continuous and reflow;
/// 3. no page tag: continuous; with an unknown page height, default to
///    page 1 with y unchanged.
///
/// A y so large that its derived page is not representable matches no
/// page at all; the item is dropped with a warning.
///
/// The heuristic is ambiguous for pages shorter than an intended local
/// offset; that ambiguity predates this engine and is accepted.
pub fn resolve_for_page(
    items: &[RenderItem],
    page_number: u32,
    page_height_mm: f32,
) -> Vec<RenderItem> {
    let mut out = Vec::new();
    for item in items {
        match item.page {
            Some(tag) if page_height_mm <= 0.0 || item.y_mm < page_height_mm => {
                if tag == page_number {
                    out.push(item.clone());
                }
            }
            Some(tag) => {
                let Some((derived, local_y)) = localize(item.y_mm, page_height_mm) else {
                    log::warn!(
                        "field {}: y {}mm is beyond any addressable page, dropped",
                        item.key,
                        item.y_mm
                    );
                    continue;
                };
                if derived == page_number {
                    log::debug!(
                        "field {}: y {}mm overflows page {} (height {}mm), reflowed to page {}",
                        item.key,
                        item.y_mm,
                        tag,
                        page_height_mm,
                        derived
                    );
                    let mut item = item.clone();
                    item.y_mm = local_y;
                    out.push(item);
                }
            }
            None => {
                if page_height_mm <= 0.0 {
                    if page_number == 1 {
                        out.push(item.clone());
                    }
                    continue;
                }
                let Some((derived, local_y)) = localize(item.y_mm, page_height_mm) else {
                    log::warn!(
                        "field {}: y {}mm is beyond any addressable page, dropped",
                        item.key,
                        item.y_mm
                    );
                    continue;
                };
                if derived == page_number {
                    let mut item = item.clone();
                    item.y_mm = local_y;
                    out.push(item);
                }
            }
        }
    }
    out
}

/// `None` when the derived page cannot be represented; schemas carry
/// arbitrary finite floats, so the division is done in f64.
fn localize(continuous_y_mm: f32, page_height_mm: f32) -> Option<(u32, f32)> {
    let pages = (f64::from(continuous_y_mm) / f64::from(page_height_mm))
        .floor()
        .max(0.0);
    if pages >= f64::from(u32::MAX) {
        return None;
    }
    let derived = pages as u32 + 1;
    let local_y = continuous_y_mm - pages as f32 * page_height_mm;
    Some((derived, local_y))
}
