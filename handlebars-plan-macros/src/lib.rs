//! Build time template checking
//!
//! Each macro runs the full compile pipeline over its templates while the crate using it is
//! being built, reporting every diagnostic as a compile error at the macro call site. The
//! expansion is one function per template that compiles the checked source with a caller
//! supplied [`Compiler`](handlebars_plan_compiler::Compiler).

use std::{fs, path::Path};

use handlebars_plan_compiler::{CompileError, Compiler, Options, ParseError, Registry};
use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{LitStr, Token, parse::Parse, parse::ParseStream, parse_macro_input};
use walkdir::WalkDir;

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            for lc in c.to_lowercase() {
                result.push(lc);
            }
        } else if c.is_alphanumeric() {
            result.push(c);
        } else {
            result.push('_');
        }
    }
    result
}

/// One template known to a macro invocation
struct Source {
    /// Partial name: the path relative to the macro's root, without extension
    name: String,
    content: String,
    /// Absolute file path, for `include_bytes!`
    path: Option<String>,
}

fn read_source(name: String, path: &Path) -> syn::Result<Source> {
    let content = fs::read_to_string(path).map_err(|err| {
        syn::Error::new(
            proc_macro2::Span::call_site(),
            format!("Failed to read {path:?}: {err}"),
        )
    })?;
    Ok(Source {
        name,
        content,
        path: Some(path.to_string_lossy().into_owned()),
    })
}

/// Helpers are registered when the program runs, so only their absence is forgiven here
fn is_reportable(error: &ParseError) -> bool {
    match error {
        ParseError::MissingHelper { .. } => false,
        ParseError::InPartial { error, .. } => is_reportable(error),
        _ => true,
    }
}

/// Compiles `source` with every other template of the invocation registered as a partial
fn check(source: &Source, partials: &[Source], lit: &LitStr) -> syn::Result<()> {
    let mut registry = Registry::new();
    for partial in partials {
        registry.register_partial(&partial.name, &partial.content);
    }
    let options = Options {
        runtime_partials: true,
        ..Options::default()
    };
    let Err(CompileError { errors }) = Compiler::new(options, &registry).compile(&source.content)
    else {
        return Ok(());
    };
    let mut reported = errors.iter().filter(|error| is_reportable(error)).map(|error| {
        syn::Error::new(lit.span(), format!("template '{}': {error}", source.name))
    });
    let Some(mut combined) = reported.next() else {
        return Ok(());
    };
    for error in reported {
        combined.combine(error);
    }
    Err(combined)
}

fn generate_code_for_source(source: &Source) -> proc_macro2::TokenStream {
    let fn_name = format_ident!("{}", to_snake_case(&source.name));
    let content = &source.content;

    let include_bytes_stmt = match &source.path {
        Some(path_str) => quote! {
            // ensure the compiler is aware the output is linked to the source so that any changes
            // to the hbs file will trigger a recompilation
            const _: &[u8] = include_bytes!(#path_str);
        },
        None => quote! {},
    };

    quote! {
        #include_bytes_stmt

        pub fn #fn_name(
            compiler: &::handlebars_plan::Compiler<'_>,
        ) -> ::std::result::Result<::handlebars_plan::Template, ::handlebars_plan::CompileError> {
            compiler.compile(#content)
        }
    }
}

fn generate_register_partials(sources: &[Source]) -> proc_macro2::TokenStream {
    let names = sources.iter().map(|source| &source.name);
    let contents = sources.iter().map(|source| &source.content);
    quote! {
        /// Registers every template of this directory as a partial under its relative name
        pub fn register_partials(registry: &mut ::handlebars_plan::Registry) {
            #(registry.register_partial(#names, #contents);)*
        }
    }
}

fn expand(sources: &[Source], partials: &[Source], lit: &LitStr) -> TokenStream {
    let mut errors: Option<syn::Error> = None;
    for source in sources {
        if let Err(error) = check(source, partials, lit) {
            match &mut errors {
                Some(combined) => combined.combine(error),
                None => errors = Some(error),
            }
        }
    }
    if let Some(errors) = errors {
        return errors.to_compile_error().into();
    }
    let functions = sources.iter().map(generate_code_for_source);
    TokenStream::from(quote! {
        #(#functions)*
    })
}

fn manifest_path(lit: &LitStr) -> syn::Result<std::path::PathBuf> {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR")
        .map_err(|_| syn::Error::new(lit.span(), "CARGO_MANIFEST_DIR not set"))?;
    Ok(Path::new(&manifest_dir).join(lit.value()))
}

struct StrInput {
    name: LitStr,
    content: LitStr,
}

impl Parse for StrInput {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let name: LitStr = input.parse()?;
        input.parse::<Token![,]>()?;
        let content: LitStr = input.parse()?;
        Ok(StrInput { name, content })
    }
}

#[proc_macro]
pub fn template_directory(input: TokenStream) -> TokenStream {
    let dir_lit = parse_macro_input!(input as LitStr);
    let root_path = match manifest_path(&dir_lit) {
        Ok(path) => path,
        Err(err) => return err.to_compile_error().into(),
    };

    if !root_path.is_dir() {
        return syn::Error::new(
            dir_lit.span(),
            format!("Directory not found: {:?}", root_path),
        )
        .to_compile_error()
        .into();
    }

    let mut sources = Vec::new();
    for entry in WalkDir::new(&root_path).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };

        let path = entry.path();
        if !path.is_file() || path.extension().is_none_or(|ext| ext != "hbs") {
            continue;
        }
        let relative = path.strip_prefix(&root_path).unwrap_or(path).with_extension("");
        let name = relative
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        match read_source(name, path) {
            Ok(source) => sources.push(source),
            Err(err) => return err.to_compile_error().into(),
        }
    }

    let functions = proc_macro2::TokenStream::from(expand(&sources, &sources, &dir_lit));
    let register = generate_register_partials(&sources);
    TokenStream::from(quote! {
        #functions
        #register
    })
}

#[proc_macro]
pub fn template_file(input: TokenStream) -> TokenStream {
    let file_lit = parse_macro_input!(input as LitStr);
    let path = match manifest_path(&file_lit) {
        Ok(path) => path,
        Err(err) => return err.to_compile_error().into(),
    };

    if !path.is_file() {
        return syn::Error::new(file_lit.span(), format!("File not found: {:?}", path))
            .to_compile_error()
            .into();
    }

    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    match read_source(name, &path) {
        Ok(source) => expand(&[source], &[], &file_lit),
        Err(err) => err.to_compile_error().into(),
    }
}

#[proc_macro]
pub fn template_str(input: TokenStream) -> TokenStream {
    let StrInput { name, content } = parse_macro_input!(input as StrInput);
    let source = Source {
        name: name.value(),
        content: content.value(),
        path: None,
    };
    expand(&[source], &[], &content)
}
