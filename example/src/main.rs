use handlebars_plan::{Compiler, Options, Registry, Value};
use serde_json::json;

mod templates {
    handlebars_plan::directory!("templates/");
    handlebars_plan::file!("template/button2.hbs");
    //language=html
    handlebars_plan::str!("hello_first_last", r#"
        <p>Hello {{firstname}} {{lastname}}</p>
    "#);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut registry = Registry::new();
    templates::register_partials(&mut registry);
    let compiler = Compiler::new(Options::default(), &registry);

    let todos = Value::from(json!({
        "todos": [
            {"id": 42, "label": "My Todo", "done": false},
            {"id": 43, "label": "Fish & Chips", "done": true},
        ]
    }));
    let html = templates::page(&compiler)?.render(&todos)?;
    println!("{}", html);

    let html2 = templates::button2(&compiler)?.render(&json!({"id": 43, "label": "Single File Todo"}).into())?;
    println!("{}", html2);

    let html3 = templates::hello_first_last(&compiler)?
        .render(&json!({"firstname": "King", "lastname": "Tubby"}).into())?;
    println!("{}", html3);

    Ok(())
}
