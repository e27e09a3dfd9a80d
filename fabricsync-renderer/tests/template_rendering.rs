use fabricsync_core::types::{FabricName, Manifest, ManifestMetadata, ResourceKey};
use fabricsync_renderer::{
    engine::MANAGED_PATH, CommitAction, RenderError, Renderer, TemplateContext, TemplateEngine,
};
use tempfile::TempDir;

fn vpc_ctx() -> TemplateContext {
    TemplateContext::for_resource(
        &FabricName::from("lab"),
        &ResourceKey::new("VPC", "default", "vpc-1"),
        "vpc.githedgehog.com/v1beta1",
        "managed",
    )
}

fn write_override(home: &TempDir, name: &str, content: &str) {
    let dir = home.path().join(".fabricsync").join("templates");
    std::fs::create_dir_all(&dir).expect("mkdir");
    std::fs::write(dir.join(name), content).expect("write template");
}

#[test]
fn user_template_override_wins() {
    let home = TempDir::new().expect("tempdir");
    write_override(&home, "managed_path.tera", "{{ managed_dir }}/{{ kind | lower }}/{{ name }}.yml\n");

    let renderer = Renderer::for_home(home.path()).expect("renderer");
    let path = renderer.managed_path(&vpc_ctx()).expect("render");
    assert_eq!(path, "managed/vpc/vpc-1.yml");

    let msg = renderer
        .commit_message(&vpc_ctx().with_action(CommitAction::Update))
        .expect("embedded commit template still present");
    assert!(msg.starts_with("Update VPC vpc-1"));
}

#[test]
fn missing_override_dir_uses_embedded_templates() {
    let home = TempDir::new().expect("tempdir");
    let renderer = Renderer::for_home(home.path()).expect("renderer");
    assert_eq!(
        renderer.managed_path(&vpc_ctx()).expect("render"),
        "managed/vpcs/vpc-1.yaml"
    );
}

#[test]
fn escaping_path_template_is_rejected() {
    let home = TempDir::new().expect("tempdir");
    write_override(&home, "managed_path.tera", "../{{ name }}.yaml");

    let renderer = Renderer::for_home(home.path()).expect("renderer");
    let err = renderer.managed_path(&vpc_ctx()).unwrap_err();
    assert!(matches!(err, RenderError::InvalidPath(_)), "got: {err}");
}

#[test]
fn absolute_path_template_is_rejected() {
    let home = TempDir::new().expect("tempdir");
    write_override(&home, "managed_path.tera", "/etc/{{ name }}");

    let renderer = Renderer::for_home(home.path()).expect("renderer");
    assert!(renderer.managed_path(&vpc_ctx()).is_err());
}

#[test]
fn broken_override_fails_construction() {
    let home = TempDir::new().expect("tempdir");
    write_override(&home, "commit_message.tera", "{{ unclosed ");
    assert!(matches!(
        Renderer::for_home(home.path()),
        Err(RenderError::Tera(_))
    ));
}

#[test]
fn engine_render_is_stable() {
    let engine = TemplateEngine::new(None).expect("engine");
    let first = engine.render(MANAGED_PATH, &vpc_ctx()).expect("render #1");
    let second = engine.render(MANAGED_PATH, &vpc_ctx()).expect("render #2");
    assert_eq!(first, second);
}

#[test]
fn empty_header_override_yields_bare_manifest() {
    let home = TempDir::new().expect("tempdir");
    write_override(&home, "manifest_header.tera", "");

    let renderer = Renderer::for_home(home.path()).expect("renderer");
    let manifest = Manifest {
        api_version: "wiring.githedgehog.com/v1beta1".to_string(),
        kind: "Switch".to_string(),
        metadata: ManifestMetadata {
            name: "leaf-01".to_string(),
            namespace: None,
        },
        spec: Default::default(),
    };
    let content = renderer
        .render_manifest(&FabricName::from("lab"), &manifest, "managed")
        .expect("render");
    assert!(content.starts_with("apiVersion:"), "got: {content}");
}

#[test]
fn rendering_handles_many_name_shapes() {
    let renderer = Renderer::new().expect("renderer");
    for name in ["simple", "kebab-case", "dots.in.name", "日本語", "x1"] {
        let ctx = TemplateContext::for_resource(
            &FabricName::from("lab"),
            &ResourceKey::new("Connection", "default", name),
            "wiring.githedgehog.com/v1beta1",
            "managed",
        );
        let path = renderer.managed_path(&ctx).expect("render");
        assert_eq!(path, format!("managed/connections/{name}.yaml"));
    }
}
