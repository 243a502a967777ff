//! HTML extraction for product and listing pages.
//!
//! Product pages are read JSON-LD first (fastest and most reliable), then
//! backfilled from DOM selectors: brand meta, price element, the
//! specification accordion grid, additional description, and document links.
//!
//! `scraper::Html` is not `Send`; all functions here are synchronous and
//! callers on the async side run them through `spawn_blocking`.

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{Error, Result};
use crate::product::{DocumentLink, Product};

/// URL shapes that identify a product detail page in sitemaps.
pub const PRODUCT_URL_PATTERNS: &[&str] = &["/product/", "/p/", "-p-", "/item/"];

#[inline]
fn selector(sel_str: &str) -> Result<Selector> {
    Selector::parse(sel_str).map_err(|_| Error::InvalidSelector(sel_str.into()))
}

fn element_text(el: &ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Text content with block boundaries preserved as newlines.
fn multiline_text(el: &ElementRef) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extract a product record from a product detail page.
pub fn product_from_html(html: &str, url: &str) -> Result<Product> {
    let doc = Html::parse_document(html);
    let mut product = Product {
        url: url.to_string(),
        ..Product::default()
    };

    apply_json_ld(&doc, &mut product)?;

    // Brand sits in a twitter card meta, not in the JSON-LD block.
    let brand_sel = selector(r#"meta[name="twitter:data1"]"#)?;
    if let Some(meta) = doc.select(&brand_sel).next() {
        let value = meta.value().attr("content").or_else(|| meta.value().attr("value"));
        if let Some(value) = value {
            product.brand = value.trim().to_string();
        }
    }

    if product.name.is_empty() {
        let h1_sel = selector("h1")?;
        if let Some(h1) = doc.select(&h1_sel).next() {
            product.name = element_text(&h1);
        }
    }

    if product.price.is_empty() {
        for sel_str in ["p.price", "span.price", "div.price"] {
            let price_sel = selector(sel_str)?;
            if let Some(price) = doc.select(&price_sel).next() {
                product.price = element_text(&price);
                break;
            }
        }
    }

    if product.sku.is_empty() {
        let sku_sel = selector(r#"span[itemprop="sku"]"#)?;
        if let Some(sku) = doc.select(&sku_sel).next() {
            product.sku = element_text(&sku);
        }
    }
    if product.mpn.is_empty() {
        let mpn_sel = selector(r#"span[itemprop="mpn"]"#)?;
        if let Some(mpn) = doc.select(&mpn_sel).next() {
            product.mpn = element_text(&mpn);
        }
    }

    if product.category.is_empty() {
        let crumb_sel = selector(r#"nav[aria-label="breadcrumb"] a"#)?;
        let crumbs: Vec<String> = doc.select(&crumb_sel).map(|a| element_text(&a)).collect();
        if !crumbs.is_empty() {
            product.category = crumbs.join(" > ");
        }
    }

    apply_accordions(&doc, &mut product)?;

    let extra_sel = selector("div#additionalDescription div.m-accordion--item--body")?;
    if let Some(body) = doc.select(&extra_sel).next() {
        product.additional_description = multiline_text(&body);
    }

    Ok(product)
}

/// Pull name/description/category/offer fields out of the first JSON-LD
/// Product block, when the page has one.
fn apply_json_ld(doc: &Html, product: &mut Product) -> Result<()> {
    let script_sel = selector(r#"script[type="application/ld+json"]"#)?;

    for script in doc.select(&script_sel) {
        let raw = script.text().collect::<String>();
        let Ok(data) = serde_json::from_str::<serde_json::Value>(&raw) else {
            continue;
        };
        if data.get("@type").and_then(|t| t.as_str()) != Some("Product") {
            continue;
        }

        if let Some(name) = data.get("name").and_then(|v| v.as_str()) {
            product.name = name.trim().to_string();
        }
        if let Some(description) = data.get("description").and_then(|v| v.as_str()) {
            product.description = description.trim().to_string();
        }
        if let Some(category) = data.get("category").and_then(|v| v.as_str()) {
            product.category = category.trim().to_string();
        }
        if let Some(image) = data.get("image").and_then(|v| v.as_str()) {
            product.images.push(image.to_string());
        }

        let offer = match data.get("offers") {
            Some(serde_json::Value::Array(offers)) => offers.first(),
            Some(offer @ serde_json::Value::Object(_)) => Some(offer),
            _ => None,
        };
        if let Some(offer) = offer {
            if let Some(sku) = offer.get("sku") {
                product.sku = scalar_to_string(sku);
            }
            if let Some(mpn) = offer.get("mpn").and_then(|v| v.as_str()) {
                product.mpn = mpn.to_string();
            }
            if let Some(price) = offer.get("price") {
                let price = scalar_to_string(price);
                if !price.is_empty() {
                    product.price = format!("${price}");
                }
            }
            if let Some(availability) = offer.get("availability").and_then(|v| v.as_str()) {
                product.availability = availability.to_string();
            }
        }
        break;
    }
    Ok(())
}

/// Walk the accordion sections for the specification grid and document list.
fn apply_accordions(doc: &Html, product: &mut Product) -> Result<()> {
    let item_sel = selector("div.m-accordion--item")?;
    let head_sel = selector("button.m-accordion--item--head")?;
    let key_sel = selector("p.key")?;
    let value_sel = selector("p.value")?;
    let grid_item_sel = selector("div.o-grid-table div.o-grid-item")?;
    let doc_link_sel = selector("div.documents--item a")?;

    for item in doc.select(&item_sel) {
        let Some(head) = item.select(&head_sel).next() else {
            continue;
        };
        let title = element_text(&head);

        if title.contains("SPECIFICATION") {
            for grid_item in item.select(&grid_item_sel) {
                let key = grid_item.select(&key_sel).next().map(|el| element_text(&el));
                let value = grid_item.select(&value_sel).next().map(|el| element_text(&el));
                if let (Some(key), Some(value)) = (key, value) {
                    if !key.is_empty() && !value.is_empty() {
                        product.specifications.insert(key, value);
                    }
                }
            }
        } else if title.contains("Documents / Software") {
            for link in item.select(&doc_link_sel) {
                if let Some(href) = link.value().attr("href") {
                    if href.is_empty() {
                        continue;
                    }
                    product.documents.push(DocumentLink {
                        name: element_text(&link),
                        url: href.to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Product links on a search listing page, resolved against the base URL.
pub fn listing_links(html: &str, base: &Url) -> Result<Vec<String>> {
    let doc = Html::parse_document(html);
    let link_sel = selector("a.m-catalogue-product-title")?;

    let mut links = Vec::new();
    for anchor in doc.select(&link_sel) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        match base.join(href) {
            Ok(resolved) => links.push(resolved.to_string()),
            Err(err) => tracing::debug!(href = href, "skipping unresolvable link: {err}"),
        }
    }
    Ok(links)
}

/// `<loc>` entries of a sitemap that look like product pages.
///
/// Sitemaps are lenient enough to run through the HTML parser; pulling one
/// element name does not justify an XPath stack.
pub fn sitemap_product_urls(xml: &str) -> Result<Vec<String>> {
    let doc = Html::parse_document(xml);
    let loc_sel = selector("loc")?;

    Ok(doc
        .select(&loc_sel)
        .map(|loc| element_text(&loc))
        .filter(|url| PRODUCT_URL_PATTERNS.iter().any(|p| url.contains(p)))
        .collect())
}
