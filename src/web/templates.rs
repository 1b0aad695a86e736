use minijinja::{Environment, Value};
use rust_embed::RustEmbed;
use tracing::error;

#[derive(RustEmbed)]
#[folder = "templates/"]
struct TemplateAssets;

pub fn init_templates() -> Environment<'static> {
    let mut env = Environment::new();

    // Templates are compiled into the binary
    env.set_loader(|name| {
        Ok(TemplateAssets::get(name)
            .map(|file| String::from_utf8_lossy(&file.data).into_owned()))
    });

    // Add filters
    env.add_filter("json", |value: Value| {
        serde_json::to_string(&value).unwrap_or_else(|_| "null".to_string())
    });

    env
}

pub fn render_template(env: &Environment, template_name: &str, context: Value) -> String {
    match env.get_template(template_name) {
        Ok(tmpl) => match tmpl.render(context) {
            Ok(result) => result,
            Err(e) => {
                error!("Template render error: {}", e);
                format!("<h1>Template Error</h1><p>{}</p>", e)
            }
        },
        Err(e) => {
            error!("Template not found: {} ({})", template_name, e);
            format!("<h1>Template Not Found</h1><p>{}: {}</p>", template_name, e)
        }
    }
}
