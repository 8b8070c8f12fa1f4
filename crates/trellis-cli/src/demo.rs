//! The demo page the CLI renders
//!
//! ```text
//! <h1>{{this.title}}</h1>
//! <Badge @label={{this.owner}} />
//! {{#if this.items}}
//!   <ul>{{#each this.items key="id" as |item|}}<li class={{item.status}}>{{item.text}}</li>{{/each}}</ul>
//! {{else}}
//!   <p>Nothing to do</p>
//! {{/if}}
//! <footer>{{concat this.items.length " items"}}</footer>
//! ```

use trellis_runtime::{
    Args, ComponentDefinition, Environment, Expr, Program, ProgramBuilder, ProgramSymbolTable,
    RenderError, TemplateRef,
};

pub struct Demo {
    pub program: Program,
    pub template: TemplateRef,
}

pub fn build(env: &Environment) -> Result<Demo, RenderError> {
    let mut program = ProgramBuilder::new();

    let badge_layout = program.template(ProgramSymbolTable::new(&["@label"], false), |e| {
        e.open_element("span");
        e.static_attr("class", "badge", None);
        e.flush_element();
        e.append(&Expr::local(1), false)?;
        e.close_element();
        Ok(())
    })?;
    let badge = ComponentDefinition::template_only("badge", badge_layout);
    let concat = env.resolver().lookup_helper("concat")?;

    let template = program.template(ProgramSymbolTable::new(&["item"], false), |e| {
        e.element("h1", |e| e.append(&Expr::this_path("title"), false))?;
        e.invoke_component(
            badge.clone(),
            &Args::new().named("label", Expr::this_path("owner")),
        )?;
        e.if_else(
            &Expr::this_path("items"),
            |e| {
                e.element("ul", |e| {
                    e.each(&Expr::this_path("items"), "id", Some(1), None, |e| {
                        e.open_element("li");
                        e.dynamic_attr("class", &Expr::path(Expr::local(1), "status"), false, None)?;
                        e.flush_element();
                        e.append(&Expr::path(Expr::local(1), "text"), false)?;
                        e.close_element();
                        Ok(())
                    })
                })
            },
            |e| {
                e.element("p", |e| {
                    e.text("Nothing to do");
                    Ok(())
                })
            },
        )?;
        e.element("footer", |e| {
            let count = Args::new()
                .positional(Expr::this_path("items.length"))
                .positional(Expr::literal(" items"));
            e.append(&Expr::helper(concat.clone(), count), false)
        })
    })?;

    Ok(Demo {
        program: program.build(),
        template,
    })
}
