use pagelift::DeployError;
use pagelift::validate::{
    shell_quote, site_slug, validate_config_name, validate_deploy_path, validate_email,
    validate_host, validate_site_name, validate_username,
};

#[test]
fn deny_listed_paths_rejected() {
    for path in [
        "/etc",
        "/etc/nginx",
        "/root/site",
        "/bin/x",
        "/sbin/x",
        "/usr/bin/site",
        "/usr/sbin/site",
        "/var/log/site",
    ] {
        let err = validate_deploy_path(path).unwrap_err();
        assert!(matches!(err, DeployError::InvalidInput(_)), "{path}");
    }
}

#[test]
fn deny_list_survives_path_tricks() {
    for path in [
        "//etc/nginx",
        "/./etc",
        "/var//log/x",
        "/usr//bin",
        "/var/./log/site",
        "/var/www/./shop",
    ] {
        let err = validate_deploy_path(path).unwrap_err();
        assert!(matches!(err, DeployError::InvalidInput(_)), "{path}");
    }
}

#[test]
fn deny_list_matches_whole_components() {
    for path in ["/etcetera/site", "/rootfs/www", "/var/logs-archive", "/srv/etc"] {
        assert!(validate_deploy_path(path).is_ok(), "{path}");
    }
}

#[test]
fn server_block_metacharacters_rejected() {
    for path in [
        "/var/www/a; } server { listen 80; root /",
        "/var/www/my site",
        "/var/www/shop;",
        "/var/www/{shop}",
        "/var/www/$host",
        "/var/www/shop\nroot",
        "/",
    ] {
        assert!(validate_deploy_path(path).is_err(), "{path:?}");
    }
    assert!(validate_deploy_path("/var/www/shop.example.com_v2/").is_ok());
}

#[test]
fn config_names() {
    assert!(validate_config_name("shop.conf").is_ok());
    assert!(validate_config_name("shop-example-com.conf").is_ok());
    assert!(validate_config_name("").is_err());
    assert!(validate_config_name("../shop.conf").is_err());
    assert!(validate_config_name("shop conf").is_err());
    assert!(validate_config_name("shop;.conf").is_err());
}

#[test]
fn traversal_rejected() {
    assert!(validate_deploy_path("/var/www/../../etc").is_err());
    assert!(validate_deploy_path("/var/www/site/..").is_err());
}

#[test]
fn relative_paths_rejected() {
    assert!(validate_deploy_path("var/www/site").is_err());
    assert!(validate_deploy_path("site").is_err());
    assert!(validate_deploy_path("").is_err());
}

#[test]
fn absolute_paths_accepted() {
    for path in ["/var/www/site", "/home/deploy/sites/shop", "/srv/www", "/opt/site"] {
        assert!(validate_deploy_path(path).is_ok(), "{path}");
    }
}

#[test]
fn usernames() {
    for name in ["deploy", "web_user", "ci-bot", "User42"] {
        assert!(validate_username(name).is_ok(), "{name}");
    }
    for name in ["", "root;id", "de ploy", "user$(id)", "a/b", "ü"] {
        assert!(validate_username(name).is_err(), "{name:?}");
    }
}

#[test]
fn hosts() {
    assert!(validate_host("203.0.113.7").is_ok());
    assert!(validate_host("shop.example.com").is_ok());
    assert!(validate_host("shop.example.com && reboot").is_err());
    assert!(validate_host("example").is_err());
}

#[test]
fn emails() {
    assert!(validate_email("owner@example.com").is_ok());
    assert!(validate_email("owner.example.com").is_err());
    assert!(validate_email("@example.com").is_err());
    assert!(validate_email("o'wner@example.com").is_err());
    assert!(validate_email("owner@localhost").is_err());
}

#[test]
fn site_names() {
    assert!(validate_site_name("shop-42").is_ok());
    assert!(validate_site_name("ab").is_err());
    assert!(validate_site_name(&"a".repeat(64)).is_err());
    assert!(validate_site_name("-shop").is_err());
    assert!(validate_site_name("Shop").is_err());
    assert!(validate_site_name("admin").is_err());
    assert!(validate_site_name("www").is_err());
}

#[test]
fn slugs_are_valid_site_names() {
    for (id, title) in [(1, "Summer Sale!"), (2, "   "), (3, "--a--b--"), (99, "Café Ünïcode")] {
        let slug = site_slug(id, 12, title);
        assert!(validate_site_name(&slug).is_ok(), "{slug}");
    }
    assert_eq!(site_slug(3, 12, "--a--b--"), "a-b-12");
}

#[test]
fn empty_title_falls_back_to_project_id() {
    assert_eq!(site_slug(8, 12, "   "), "project8-12");
    assert_eq!(site_slug(8, 12, "!!!"), "project8-12");
}

#[test]
fn slug_title_part_is_capped() {
    let slug = site_slug(5, 12, &"x".repeat(80));
    assert_eq!(slug, format!("{}-12", "x".repeat(30)));
}

#[test]
fn slug_is_capped_at_fifty() {
    let slug = site_slug(5, u64::MAX, &"x".repeat(40));
    assert_eq!(slug.len(), 50);
    assert_eq!(slug, format!("{}-{}", "x".repeat(30), &u64::MAX.to_string()[..19]));
    assert!(!slug.ends_with('-'));
}

#[test]
fn quoting() {
    assert_eq!(shell_quote("/var/www/site"), "/var/www/site");
    assert_eq!(shell_quote("/var/www/my site"), "'/var/www/my site'");
    assert_eq!(shell_quote("it's"), r"'it'\''s'");
}
