use harvester::extract;
use url::Url;

const PRODUCT_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta name="twitter:data1" content="Baldor-Reliance">
<script type="application/ld+json">
{
  "@context": "https://schema.org",
  "@type": "Product",
  "name": "Baldor-Reliance EM3546 General Purpose Motor, 1 HP",
  "description": "Three-phase general purpose motor, 1750 RPM.",
  "category": "Electric Motors",
  "image": "https://cdn.store.example/images/em3546.jpg",
  "offers": [
    {
      "@type": "Offer",
      "sku": 118033,
      "mpn": "EM3546",
      "price": "412.09",
      "availability": "https://schema.org/InStock"
    }
  ]
}
</script>
</head>
<body>
<h1>Ignored because JSON-LD wins</h1>
<div class="m-accordion--item">
  <button class="m-accordion--item--head">SPECIFICATIONS</button>
  <div class="m-accordion--item--body">
    <div class="o-grid-table">
      <div class="o-grid-item"><p class="key">Horsepower</p><p class="value">1 HP</p></div>
      <div class="o-grid-item"><p class="key">Voltage</p><p class="value">230/460 V</p></div>
      <div class="o-grid-item"><p class="key"></p><p class="value">dropped</p></div>
    </div>
  </div>
</div>
<div class="m-accordion--item">
  <button class="m-accordion--item--head">Documents / Software</button>
  <div class="m-accordion--item--body">
    <div class="documents--item"><a href="/docs/em3546-manual.pdf">Installation manual</a></div>
    <div class="documents--item"><a href="/docs/em3546-cad.zip">CAD drawing</a></div>
  </div>
</div>
<div id="additionalDescription">
  <div class="m-accordion--item--body">
    <p>Severe duty rated.</p>
    <p>Suitable for conveyors and pumps.</p>
  </div>
</div>
</body>
</html>"#;

const FALLBACK_PAGE: &str = r#"<!DOCTYPE html>
<html>
<body>
<h1>Hydraulic Gear Pump GP-F20, 11 GPM</h1>
<nav aria-label="breadcrumb">
  <a href="/">Home</a>
  <a href="/hydraulics/">Hydraulics</a>
  <a href="/hydraulics/pumps/">Pumps</a>
</nav>
<p class="price">$199.50</p>
<span itemprop="sku">GPF20-118</span>
<span itemprop="mpn">GP-F20</span>
</body>
</html>"#;

const LISTING_PAGE: &str = r#"<!DOCTYPE html>
<html>
<body>
<a class="m-catalogue-product-title" href="/electrical-motors/em3546-p-118033/">EM3546</a>
<a class="m-catalogue-product-title" href="https://www.store.example/hydraulics-pumps/gp-f20-p-220411/">GP-F20</a>
<a class="unrelated" href="/about/">About us</a>
</body>
</html>"#;

const SITEMAP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://www.store.example/electrical-motors/em3546-p-118033/</loc></url>
  <url><loc>https://www.store.example/about/</loc></url>
  <url><loc>https://www.store.example/product/abc123/</loc></url>
</urlset>"#;

#[test]
fn json_ld_fields_win() {
    let product =
        extract::product_from_html(PRODUCT_PAGE, "https://www.store.example/em3546-p-118033/")
            .unwrap();

    assert_eq!(product.name, "Baldor-Reliance EM3546 General Purpose Motor, 1 HP");
    assert_eq!(product.description, "Three-phase general purpose motor, 1750 RPM.");
    assert_eq!(product.category, "Electric Motors");
    assert_eq!(product.sku, "118033");
    assert_eq!(product.mpn, "EM3546");
    assert_eq!(product.price, "$412.09");
    assert_eq!(product.availability, "https://schema.org/InStock");
    assert_eq!(product.images, vec!["https://cdn.store.example/images/em3546.jpg"]);
    assert_eq!(product.brand, "Baldor-Reliance");
}

#[test]
fn specification_grid_is_collected() {
    let product = extract::product_from_html(PRODUCT_PAGE, "https://x.example/p").unwrap();

    assert_eq!(product.specifications.len(), 2);
    assert_eq!(product.specifications["Horsepower"], "1 HP");
    assert_eq!(product.specifications["Voltage"], "230/460 V");
}

#[test]
fn documents_and_additional_description_are_collected() {
    let product = extract::product_from_html(PRODUCT_PAGE, "https://x.example/p").unwrap();

    assert_eq!(product.documents.len(), 2);
    assert_eq!(product.documents[0].name, "Installation manual");
    assert_eq!(product.documents[0].url, "/docs/em3546-manual.pdf");
    assert_eq!(
        product.additional_description,
        "Severe duty rated.\nSuitable for conveyors and pumps."
    );
}

#[test]
fn dom_fallbacks_cover_pages_without_json_ld() {
    let product =
        extract::product_from_html(FALLBACK_PAGE, "https://www.store.example/gp-f20/").unwrap();

    assert_eq!(product.name, "Hydraulic Gear Pump GP-F20, 11 GPM");
    assert_eq!(product.price, "$199.50");
    assert_eq!(product.sku, "GPF20-118");
    assert_eq!(product.mpn, "GP-F20");
    assert_eq!(product.category, "Home > Hydraulics > Pumps");
    assert!(product.description.is_empty());
}

#[test]
fn listing_links_resolve_against_the_base() {
    let base = Url::parse("https://www.store.example/").unwrap();
    let links = extract::listing_links(LISTING_PAGE, &base).unwrap();

    assert_eq!(
        links,
        vec![
            "https://www.store.example/electrical-motors/em3546-p-118033/",
            "https://www.store.example/hydraulics-pumps/gp-f20-p-220411/",
        ]
    );
}

#[test]
fn empty_listing_yields_no_links() {
    let base = Url::parse("https://www.store.example/").unwrap();
    let links = extract::listing_links("<html><body>No results</body></html>", &base).unwrap();
    assert!(links.is_empty());
}

#[test]
fn sitemap_keeps_only_product_urls() {
    let urls = extract::sitemap_product_urls(SITEMAP).unwrap();
    assert_eq!(
        urls,
        vec![
            "https://www.store.example/electrical-motors/em3546-p-118033/",
            "https://www.store.example/product/abc123/",
        ]
    );
}

#[test]
fn record_url_is_preserved() {
    let url = "https://www.store.example/em3546-p-118033/";
    let product = extract::product_from_html(PRODUCT_PAGE, url).unwrap();
    assert_eq!(product.url, url);
}
