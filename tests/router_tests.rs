use grackle::{Error, RouteTable};

mod common;

#[test]
fn resolves_literal_route() {
    common::setup();
    let mut table = RouteTable::new(false);
    table.add("/about", "AboutHandler", None).unwrap();
    let resolution = table.resolve("/about").unwrap();
    assert_eq!(resolution.route.pattern(), "/about");
    assert_eq!(resolution.route.handler(), "AboutHandler");
    assert!(resolution.vars.is_empty());
}

#[test]
fn captures_variables_in_pattern_order() {
    common::setup();
    let mut table = RouteTable::new(false);
    table
        .add("/user/{id}/posts/{slug}", "PostHandler", None)
        .unwrap();
    let resolution = table.resolve("/user/42/posts/intro").unwrap();
    assert_eq!(
        resolution.vars.as_slice(),
        &[
            ("id".to_string(), "42".to_string()),
            ("slug".to_string(), "intro".to_string()),
        ]
    );
}

#[test]
fn variable_route_outscores_literal_twin() {
    common::setup();
    let mut table = RouteTable::new(false);
    table.add("/product/test", "LiteralHandler", None).unwrap();
    table
        .add("/product/{category}", "CategoryHandler", None)
        .unwrap();
    // Both match; the capturing route scores one point higher.
    let resolution = table.resolve("/product/test").unwrap();
    assert_eq!(resolution.route.handler(), "CategoryHandler");
    assert_eq!(resolution.vars.as_slice()[0].1, "test");
}

#[test]
fn equal_scores_keep_the_earlier_route() {
    common::setup();
    let mut table = RouteTable::new(false);
    table.add("/{a}/x", "FirstHandler", None).unwrap();
    table.add("/{b}/x", "SecondHandler", None).unwrap();
    let resolution = table.resolve("/q/x").unwrap();
    assert_eq!(resolution.route.handler(), "FirstHandler");
}

#[test]
fn no_match_returns_none() {
    common::setup();
    let mut table = RouteTable::new(false);
    table.add("/user/{id}", "UserHandler", None).unwrap();
    assert!(table.resolve("/user").is_none());
    assert!(table.resolve("/user/1/extra").is_none());
    assert!(table.resolve("/").is_none());
}

#[test]
fn variables_never_span_segments() {
    common::setup();
    let mut table = RouteTable::new(false);
    table.add("/file/{name}", "FileHandler", None).unwrap();
    assert!(table.resolve("/file/a/b").is_none());
}

#[test]
fn reverse_url_round_trips() {
    common::setup();
    let mut table = RouteTable::new(false);
    table
        .add("/user/{id}/posts/{slug}", "PostHandler", Some("post".into()))
        .unwrap();
    let route = table.by_alias("post").unwrap();
    let url = route.url(&[("id", "42"), ("slug", "intro")]).unwrap();
    assert_eq!(url, "/user/42/posts/intro");
    let resolution = table.resolve(&url).unwrap();
    assert_eq!(resolution.route.pattern(), "/user/{id}/posts/{slug}");
}

#[test]
fn reverse_url_requires_all_variables() {
    common::setup();
    let mut table = RouteTable::new(false);
    table
        .add("/user/{id}", "UserHandler", Some("user".into()))
        .unwrap();
    let route = table.by_alias("user").unwrap();
    let err = route.url(&[]).unwrap_err();
    assert!(matches!(err, Error::MissingRouteVar(name) if name == "id"));
}

#[test]
fn unknown_alias_is_an_error() {
    common::setup();
    let table = RouteTable::new(false);
    assert!(matches!(
        table.by_alias("nope").unwrap_err(),
        Error::UnknownRoute(_)
    ));
}
