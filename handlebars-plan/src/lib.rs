extern crate self as handlebars_plan;

pub use handlebars_plan_compiler::*;
pub use handlebars_plan_macros::template_directory as directory;
pub use handlebars_plan_macros::template_file as file;
pub use handlebars_plan_macros::template_str as str;
