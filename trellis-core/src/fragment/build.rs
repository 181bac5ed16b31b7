//! Descriptor to fragment.

use std::rc::Rc;

use super::component::ComponentState;
use super::control_flow::ControlFlowState;
use super::dynamic::DynamicState;
use super::element::ElementState;
use super::list::ListState;
use super::slot::SlotState;
use super::text::TextState;
use super::{Fragment, Host, Kind};
use crate::component::{ComponentType, Instance};
use crate::error::{Error, Result};
use crate::template::{Branch, ComponentRef, CondMarker, Descriptor, DescriptorKind};

/// Build the unmounted fragment for `desc`. `scope` is the instance whose
/// template `desc` belongs to.
pub(crate) fn build(desc: &Descriptor, host: &Rc<Host>, scope: Option<&Instance>) -> Result<Fragment> {
    match &desc.cond {
        None => {}
        Some(CondMarker::If(predicate)) => {
            let body = Descriptor {
                cond: None,
                ..desc.clone()
            };
            let branch = Branch {
                predicate: Some(Rc::clone(predicate)),
                body,
            };
            return build(&Descriptor::control_flow(vec![branch]), host, scope);
        }
        Some(CondMarker::ElseIf(_)) => return Err(Error::Compile("`v-else-if` without a preceding `v-if`".into())),
        Some(CondMarker::Else) => return Err(Error::Compile("`v-else` without a preceding `v-if`".into())),
    }

    let kind = match &desc.kind {
        DescriptorKind::Element { tag, attrs, children } => {
            let fragment = Fragment::new(host, scope.cloned(), Kind::Element(ElementState::new(Rc::clone(tag), Rc::clone(attrs))));
            build_children(&fragment, children, host, scope)?;
            return Ok(fragment);
        }
        DescriptorKind::Group(children) => {
            let fragment = Fragment::new(host, scope.cloned(), Kind::Group);
            build_children(&fragment, children, host, scope)?;
            return Ok(fragment);
        }
        DescriptorKind::Text(source) => Kind::Text(TextState::new(source.clone())),
        DescriptorKind::ControlFlow(branches) => Kind::ControlFlow(ControlFlowState::new(Rc::clone(branches))),
        DescriptorKind::List(spec) => Kind::List(ListState::new(Rc::clone(spec))),
        DescriptorKind::Component { target, attrs, slots } => {
            let ty = resolve(target, host, scope)?;
            Kind::Component(ComponentState::new(ty, Rc::clone(attrs), Rc::clone(slots)))
        }
        DescriptorKind::Slot { name, fallback } => {
            if scope.is_none() {
                return Err(Error::render("slot", format!("slot `{name}` used outside a component")));
            }
            Kind::Slot(SlotState::new(name.clone(), Rc::clone(fallback)))
        }
        DescriptorKind::Dynamic { is, attrs, children } => {
            Kind::Dynamic(DynamicState::new(Rc::clone(is), Rc::clone(attrs), Rc::clone(children)))
        }
        DescriptorKind::Invalid(message) => return Err(Error::Compile(message.clone())),
    };
    Ok(Fragment::new(host, scope.cloned(), kind))
}

fn build_children(parent: &Fragment, children: &[Descriptor], host: &Rc<Host>, scope: Option<&Instance>) -> Result<()> {
    for child in children {
        parent.adopt(&build(child, host, scope)?);
    }
    Ok(())
}

/// A component reference: explicit types as is, names against the scope's
/// imports first, then the app-wide registry.
fn resolve(target: &ComponentRef, host: &Host, scope: Option<&Instance>) -> Result<ComponentType> {
    match target {
        ComponentRef::Type(ty) => Ok(ty.clone()),
        ComponentRef::Named(name) => scope
            .and_then(|instance| instance.resolve(name))
            .or_else(|| host.resolve(name))
            .ok_or_else(|| {
                let caller = scope.map_or("<root>", Instance::name);
                Error::render(caller, format!("unknown component `{name}`"))
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DictBackend;
    use crate::component::Component;
    use crate::template::{h, Attrs};

    #[derive(Default)]
    struct Card;

    impl Component for Card {
        fn render(&self, _cx: &Instance) -> Result<Descriptor> {
            Ok(h("card", Attrs::new(), vec![]))
        }
    }

    #[test]
    fn named_components_resolve_through_the_registry() {
        let host = Host::new(Rc::new(DictBackend::new()));
        let desc = h("ui.Card", Attrs::new(), vec![]);
        assert!(matches!(build(&desc, &host, None), Err(Error::Render { .. })));

        host.components.borrow_mut().push(ComponentType::of::<Card>());
        let frag = build(&desc, &host, None).unwrap();
        assert_eq!(frag.kind_name(), "component");
    }

    #[test]
    fn stray_else_is_a_compile_error() {
        let host = Host::new(Rc::new(DictBackend::new()));
        let desc = h("box", Attrs::new().otherwise(), vec![]);
        assert!(matches!(build(&desc, &host, None), Err(Error::Compile(_))));
    }

    #[test]
    fn lone_if_becomes_control_flow() {
        let host = Host::new(Rc::new(DictBackend::new()));
        let desc = h("box", Attrs::new().when(|| true), vec![]);
        let frag = build(&desc, &host, None).unwrap();
        assert_eq!(frag.kind_name(), "control-flow");
    }
}
