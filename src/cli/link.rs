//! tasklink link command implementations.

use serde::Serialize;

use crate::cli::{CommonOptions, Context};
use crate::error::Result;
use crate::model::{EdgePair, RelationType, Relationship};
use crate::output::{emit_success, HumanOutput};

pub struct LinkOptions {
    pub relation: String,
    pub a: String,
    pub b: String,
    pub common: CommonOptions,
}

#[derive(Serialize)]
struct UnlinkOutput {
    relation: RelationType,
    a: String,
    b: String,
    removed: bool,
}

#[derive(Serialize)]
struct LinkListOutput {
    id: String,
    relationships: Vec<Relationship>,
}

pub fn run_add(options: LinkOptions) -> Result<()> {
    let relation: RelationType = options.relation.parse()?;
    let ctx = Context::load(options.common.root.as_deref())?;
    let mut service = ctx.service()?;

    let pair = service.add_relationship(relation, &options.a, &options.b)?;

    let human = pair_human("Linked", &pair);
    emit_success(options.common.output(), "link add", &pair, Some(&human))
}

pub fn run_remove(options: LinkOptions) -> Result<()> {
    let relation: RelationType = options.relation.parse()?;
    let ctx = Context::load(options.common.root.as_deref())?;
    let mut service = ctx.service()?;

    let removed = service.remove_relationship(relation, &options.a, &options.b)?;

    let mut human = HumanOutput::new(if removed {
        "Unlinked"
    } else {
        "Nothing to unlink"
    });
    human.push_summary(options.a.clone(), format!("{relation} {}", options.b));

    let output = UnlinkOutput {
        relation,
        a: options.a,
        b: options.b,
        removed,
    };
    emit_success(options.common.output(), "link rm", &output, Some(&human))
}

pub fn run_move_parent(child: String, parent: String, common: CommonOptions) -> Result<()> {
    let ctx = Context::load(common.root.as_deref())?;
    let mut service = ctx.service()?;

    let pair = service.move_parent(&child, &parent)?;

    let human = pair_human("Parent moved", &pair);
    emit_success(common.output(), "link move-parent", &pair, Some(&human))
}

pub fn run_list(id: String, relation: Option<String>, common: CommonOptions) -> Result<()> {
    let relation = relation
        .as_deref()
        .map(str::parse::<RelationType>)
        .transpose()?;
    let ctx = Context::load(common.root.as_deref())?;
    let service = ctx.service()?;

    let relationships = service.relationships_of(&id, relation)?;

    let mut human = HumanOutput::new(format!("{} relationship(s) on {id}", relationships.len()));
    for rel in &relationships {
        human.push_detail(format!("{} {}", rel.relation, rel.task));
    }

    let output = LinkListOutput { id, relationships };
    emit_success(common.output(), "link ls", &output, Some(&human))
}

fn pair_human(header: &str, pair: &EdgePair) -> HumanOutput {
    let mut human = HumanOutput::new(header);
    human.push_summary(
        pair.owner.clone(),
        format!("{} {}", pair.forward.relation, pair.forward.task),
    );
    human.push_summary(
        pair.other.clone(),
        format!("{} {}", pair.inverse.relation, pair.inverse.task),
    );
    human
}
