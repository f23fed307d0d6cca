// Unit tests for selector generation against an in-memory document

use super::*;
use crate::page::matching;
use crate::page::memory::MemoryPage;
use pretty_assertions::assert_eq;

async fn generate_for(html: &str, target: &str) -> (MemoryPage, GeneratedSelector) {
    let page = MemoryPage::new("https://example.com/", html);
    let snapshot = page.snapshot_of(target).unwrap();
    let generated = generate(&snapshot, &SelectorConfig::default(), |sel, text| {
        page.count_matching(sel, text)
    })
    .unwrap();
    (page, generated)
}

async fn assert_unique(page: &MemoryPage, generated: &GeneratedSelector) {
    let found = matching(page, &generated.selector, generated.text.as_deref())
        .await
        .unwrap();
    assert_eq!(found.len(), 1, "{} is not unique", generated.selector);
}

#[tokio::test]
async fn test_id_wins() {
    let (page, generated) = generate_for(
        r#"<html><body><button id="submit" data-testid="go" class="btn">Go</button></body></html>"#,
        "button",
    )
    .await;

    assert_eq!(generated.selector, "#submit");
    assert_eq!(generated.strategy, Strategy::Id);
    assert_eq!(generated.text, None);
    assert_unique(&page, &generated).await;
}

#[tokio::test]
async fn test_id_with_reserved_characters_is_escaped() {
    let (page, generated) = generate_for(
        r#"<html><body><div id="form:email">x</div></body></html>"#,
        "div",
    )
    .await;

    assert_eq!(generated.selector, "#form\\:email");
    assert_unique(&page, &generated).await;
}

#[tokio::test]
async fn test_duplicate_id_falls_through_to_test_attribute() {
    let (page, generated) = generate_for(
        r#"<html><body>
            <button id="dup" data-testid="save">Save</button>
            <button id="dup">Other</button>
        </body></html>"#,
        "[data-testid]",
    )
    .await;

    assert_eq!(generated.selector, "[data-testid=\"save\"]");
    assert_eq!(generated.strategy, Strategy::TestAttribute);
    assert_unique(&page, &generated).await;
}

#[tokio::test]
async fn test_aria_label_is_tag_qualified() {
    let (page, generated) = generate_for(
        r#"<html><body><button aria-label="Close dialog">x</button><button>x</button></body></html>"#,
        "[aria-label]",
    )
    .await;

    assert_eq!(generated.selector, "button[aria-label=\"Close dialog\"]");
    assert_eq!(generated.strategy, Strategy::TestAttribute);
    assert_unique(&page, &generated).await;
}

#[tokio::test]
async fn test_name_attribute() {
    let (page, generated) = generate_for(
        r#"<html><body><input name="email"><input name="password"></body></html>"#,
        "input",
    )
    .await;

    assert_eq!(generated.selector, "input[name=\"email\"]");
    assert_eq!(generated.strategy, Strategy::Name);
    assert_unique(&page, &generated).await;
}

#[tokio::test]
async fn test_full_class_list_with_utility_classes() {
    let (page, generated) = generate_for(
        r#"<html><body>
            <div class="card md:flex">one</div>
            <div class="card">two</div>
        </body></html>"#,
        "div",
    )
    .await;

    assert_eq!(generated.selector, "div.card.md\\:flex");
    assert_eq!(generated.strategy, Strategy::ClassList);
    assert_unique(&page, &generated).await;
}

#[tokio::test]
async fn test_text_qualifies_ambiguous_tag() {
    let (page, generated) = generate_for(
        r#"<html><body><button>Save</button><button>Delete</button></body></html>"#,
        "button:nth-child(2)",
    )
    .await;

    assert_eq!(generated.selector, "button");
    assert_eq!(generated.text.as_deref(), Some("Delete"));
    assert_eq!(generated.strategy, Strategy::Text);
    assert_unique(&page, &generated).await;
}

#[tokio::test]
async fn test_structural_path_when_nothing_else_is_unique() {
    let (page, generated) = generate_for(
        r#"<html><body><ul><li>x</li><li>x</li></ul></body></html>"#,
        "li:nth-child(2)",
    )
    .await;

    assert_eq!(generated.selector, "body > ul > li:nth-child(2)");
    assert_eq!(generated.strategy, Strategy::Path);
    assert_unique(&page, &generated).await;
}

#[tokio::test]
async fn test_structural_path_anchors_on_ancestor_id() {
    let (page, generated) = generate_for(
        r#"<html><body><div id="list"><span>x</span><span>x</span></div></body></html>"#,
        "span:nth-child(2)",
    )
    .await;

    assert_eq!(generated.selector, "div#list > span:nth-child(2)");
    assert_unique(&page, &generated).await;
}

#[tokio::test]
async fn test_long_text_is_not_used() {
    let long = "a".repeat(60);
    let html = format!("<html><body><p>{long}</p><p>{long}</p></body></html>");
    let (_, generated) = generate_for(&html, "p:nth-child(1)").await;

    assert_eq!(generated.strategy, Strategy::Path);
    assert_eq!(generated.text, None);
}

#[test]
fn test_structural_path_depth_cap() {
    let segment = |tag: &str| PathSegment {
        tag: tag.to_string(),
        position: 1,
        same_tag_siblings: 1,
        ..Default::default()
    };
    let path: Vec<PathSegment> = ["span", "div", "div", "div", "div", "div", "body", "html"]
        .into_iter()
        .map(segment)
        .collect();

    let config = SelectorConfig {
        max_path_depth: 3,
        ..Default::default()
    };
    assert_eq!(structural_path(&path, &config), "div > div > span");
}

#[test]
fn test_structural_path_nth_child_limits() {
    let path = vec![
        PathSegment {
            tag: "li".to_string(),
            classes: vec!["a".into(), "b".into(), "c".into()],
            position: 12,
            same_tag_siblings: 15,
            ..Default::default()
        },
        PathSegment {
            tag: "ul".to_string(),
            position: 3,
            same_tag_siblings: 2,
            ..Default::default()
        },
        PathSegment {
            tag: "html".to_string(),
            position: 1,
            same_tag_siblings: 1,
            ..Default::default()
        },
    ];

    assert_eq!(
        structural_path(&path, &SelectorConfig::default()),
        "ul:nth-child(3) > li.a.b"
    );
}

#[test]
fn test_rejected_candidates_are_skipped() {
    let page = MemoryPage::new(
        "https://example.com/",
        r#"<html><body><button id="save" name="save">Save</button></body></html>"#,
    );
    let snapshot = page.snapshot_of("button").unwrap();
    let mut asked = Vec::new();
    let generated = generate(&snapshot, &SelectorConfig::default(), |sel, _| {
        asked.push(sel.to_string());
        if sel.starts_with('#') {
            anyhow::bail!("document is gone");
        }
        Ok(1)
    })
    .unwrap();

    assert_eq!(generated.selector, "button[name=\"save\"]");
    assert_eq!(generated.strategy, Strategy::Name);
    assert_eq!(asked, vec!["#save", "button[name=\"save\"]"]);
}
