//! Import planning
//!
//! The configured service tree is flattened into declaration order, then
//! expanded into a dependency graph: a collection association from a
//! planned type to a type whose CSV file is present makes the target a child
//! of the owner. The graph is walked depth-first (parent before children)
//! with an explicit stack. Each service is planned once; an edge back onto
//! the current path is a cycle.

use crate::source::ServiceFiles;
use groundwork_common::config::ServiceNode;
use groundwork_common::schema::AssociationKind;
use groundwork_common::{AccessorKind, AssociationDefinition, EntityDefinition, EntityRegistry};
use groundwork_common::{Error, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, warn};

/// One CSV file to import
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedService {
    pub service: String,
    pub type_name: String,
    pub path: PathBuf,
}

/// How rows of a child type are attached to parents imported before them
///
/// The child's `child_property` cell names parent ids; each named parent
/// receives the child through `parent_accessor` on `parent_property`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildLinkSpec {
    pub parent_type: String,
    pub parent_property: String,
    pub parent_accessor: AccessorKind,
    /// The parent stores the link and is re-persisted after wiring
    pub parent_owns_link: bool,
    pub child_type: String,
    pub child_property: String,
}

/// Ordered import steps plus the parent/child links between them
#[derive(Debug, Clone, Default)]
pub struct ImportPlan {
    pub steps: Vec<PlannedService>,
    pub links: Vec<ChildLinkSpec>,
}

impl ImportPlan {
    /// Plan the import of `services` from the discovered `files`
    ///
    /// Declared services without a file, or without a registered entity
    /// type, are skipped with a warning.
    pub fn build(
        registry: &EntityRegistry,
        files: &ServiceFiles,
        services: &[ServiceNode],
    ) -> Result<Self> {
        let mut roots: Vec<String> = Vec::new();
        for service in flatten_services(services) {
            if roots.contains(&service) {
                continue;
            }
            if !files.contains(&service) {
                warn!(
                    "No {}.csv in {}, skipping service",
                    service,
                    files.directory().display()
                );
                continue;
            }
            if definition_for_service(registry, &service).is_none() {
                warn!("No entity type is registered for service '{}', skipping", service);
                continue;
            }
            roots.push(service);
        }

        let mut plan = ImportPlan::default();
        let mut planned: HashSet<String> = HashSet::new();

        for root in roots {
            if planned.contains(&root) {
                continue;
            }

            let mut path: Vec<Frame> = vec![plan.visit(registry, files, &root, &mut planned)?];
            while let Some(frame) = path.last_mut() {
                let Some(child) = frame.children.get(frame.next).cloned() else {
                    path.pop();
                    continue;
                };
                frame.next += 1;

                if let Some(start) = path.iter().position(|f| f.service == child) {
                    let cycle: Vec<&str> = path[start..]
                        .iter()
                        .map(|f| f.service.as_str())
                        .chain(std::iter::once(child.as_str()))
                        .collect();
                    return Err(Error::Config(format!(
                        "Import services form a cycle: {}",
                        cycle.join(" -> ")
                    )));
                }
                if planned.contains(&child) {
                    continue;
                }

                let frame = plan.visit(registry, files, &child, &mut planned)?;
                path.push(frame);
            }
        }

        debug!(
            "Import plan: {} services, {} child links",
            plan.steps.len(),
            plan.links.len()
        );
        Ok(plan)
    }

    /// Record a service as the next step and collect its children
    fn visit(
        &mut self,
        registry: &EntityRegistry,
        files: &ServiceFiles,
        service: &str,
        planned: &mut HashSet<String>,
    ) -> Result<Frame> {
        let definition = definition_for_service(registry, service)
            .ok_or_else(|| Error::NotFound(format!("Entity type for service {}", service)))?;
        let path = files
            .get(service)
            .ok_or_else(|| Error::NotFound(format!("{}.csv", service)))?;

        planned.insert(service.to_string());
        self.steps.push(PlannedService {
            service: service.to_string(),
            type_name: definition.name.clone(),
            path: path.to_path_buf(),
        });

        let mut children = Vec::new();
        for association in definition.associations.iter().filter(|a| is_parent_side(a)) {
            let target = registry.definition(&association.target)?;
            if target.name == definition.name {
                continue;
            }
            let Some(child_service) = service_for_type(files, target) else {
                continue;
            };

            if let Some(link) = child_link(definition, association, target) {
                self.links.push(link);
            }
            if !children.contains(&child_service) {
                children.push(child_service);
            }
        }

        Ok(Frame {
            service: service.to_string(),
            children,
            next: 0,
        })
    }

    /// Links whose child side is `child_type`
    pub fn links_for_child<'a>(
        &'a self,
        child_type: &'a str,
    ) -> impl Iterator<Item = &'a ChildLinkSpec> + 'a {
        self.links
            .iter()
            .filter(move |link| link.child_type == child_type)
    }

    /// Whether a step after `step` wires its rows to `parent_type` parents
    pub fn parent_needed_after(&self, parent_type: &str, step: usize) -> bool {
        self.steps.iter().skip(step + 1).any(|later| {
            self.links_for_child(&later.type_name)
                .any(|link| link.parent_type == parent_type)
        })
    }

    pub fn services(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.service.as_str()).collect()
    }
}

/// Position in the depth-first walk
struct Frame {
    service: String,
    children: Vec<String>,
    next: usize,
}

/// Entity type imported by a service: `order_item` or the type name `orderitem`
fn definition_for_service<'r>(
    registry: &'r EntityRegistry,
    service: &str,
) -> Option<&'r EntityDefinition> {
    registry
        .by_service(service)
        .or_else(|| registry.definition(service).ok())
}

/// Service whose file holds rows of `definition`, if one was discovered
fn service_for_type(files: &ServiceFiles, definition: &EntityDefinition) -> Option<String> {
    [definition.service_name(), definition.name.to_ascii_lowercase()]
        .into_iter()
        .find(|service| files.contains(service))
}

/// One-to-many and owning many-to-many associations make their target a child
fn is_parent_side(association: &AssociationDefinition) -> bool {
    match association.kind {
        AssociationKind::OneToMany => true,
        AssociationKind::ManyToMany => association.is_owning_side(),
        AssociationKind::ManyToOne | AssociationKind::OneToOne => false,
    }
}

fn child_link(
    parent: &EntityDefinition,
    association: &AssociationDefinition,
    child: &EntityDefinition,
) -> Option<ChildLinkSpec> {
    // Unidirectional many-to-many has no back-reference on the child
    let back_reference = association
        .mapped_by
        .as_ref()
        .or(association.inversed_by.as_ref())?;

    Some(ChildLinkSpec {
        parent_type: parent.name.clone(),
        parent_property: association.name.clone(),
        parent_accessor: if association.is_collection() {
            AccessorKind::Add
        } else {
            AccessorKind::Set
        },
        parent_owns_link: association.is_owning_side(),
        child_type: child.name.clone(),
        child_property: back_reference.clone(),
    })
}

/// Flatten strings, nested lists and `{ parent = [children] }` groups
///
/// Groups list their parent before its children. Names are lower-cased.
pub fn flatten_services(nodes: &[ServiceNode]) -> Vec<String> {
    enum Pending<'a> {
        Node(&'a ServiceNode),
        Name(&'a str),
    }

    let mut services = Vec::new();
    let mut stack: Vec<Pending<'_>> = nodes.iter().rev().map(Pending::Node).collect();

    while let Some(pending) = stack.pop() {
        let name = match pending {
            Pending::Name(name) => name,
            Pending::Node(ServiceNode::Name(name)) => name.as_str(),
            Pending::Node(ServiceNode::List(items)) => {
                stack.extend(items.iter().rev().map(Pending::Node));
                continue;
            }
            Pending::Node(ServiceNode::Group(groups)) => {
                for (parent, children) in groups.iter().rev() {
                    stack.extend(children.iter().rev().map(Pending::Node));
                    stack.push(Pending::Name(parent));
                }
                continue;
            }
        };

        let name = name.trim();
        if !name.is_empty() {
            services.push(name.to_ascii_lowercase());
        }
    }

    services
}
