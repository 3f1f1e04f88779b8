//! End-to-end synthesis over the fixture applications

use formwork_core::{naming, ContentDigest, CoreError};
use formwork_synth::inspect::{Matcher, Template};
use formwork_synth::{synthesize, Manifest, SynthConfig, SynthError, Synthesizer};
use formwork_test_fixtures::{
    cognito_app, fargate_app, imported_role_app, node, state_machine_app, vpn_app,
    ASSERTION_STACK, FIRST_STACK, ROLE_STACK, SECOND_STACK,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn id(components: &[&str]) -> String {
    naming::logical_id(components).unwrap()
}

#[test]
fn synthesis_is_byte_identical_across_runs() -> Result<(), Box<dyn std::error::Error>> {
    let first = synthesize(&imported_role_app())?;
    let second = synthesize(&imported_role_app())?;

    assert_eq!(first.manifest(), second.manifest());
    for unit in first.order() {
        assert_eq!(first.rendered(unit), second.rendered(unit), "unit {}", unit);
    }
    Ok(())
}

#[test]
fn units_are_ordered_after_their_dependencies() -> Result<(), Box<dyn std::error::Error>> {
    let assembly = synthesize(&imported_role_app())?;
    assert_eq!(
        assembly.order(),
        [ROLE_STACK, FIRST_STACK, SECOND_STACK, ASSERTION_STACK]
    );

    let manifest = assembly.manifest();
    let second = manifest.unit(SECOND_STACK).unwrap();
    assert_eq!(second.dependencies.len(), 1);
    assert_eq!(second.dependencies[0].unit, FIRST_STACK);
    assert_eq!(
        second.dependencies[0].reason.as_deref(),
        Some("So that this stack can be tested after both are deployed.")
    );
    let assertions: Vec<_> = manifest
        .unit(ASSERTION_STACK)
        .unwrap()
        .dependencies
        .iter()
        .map(|d| d.unit.as_str())
        .collect();
    assert_eq!(assertions, [ROLE_STACK, FIRST_STACK, SECOND_STACK]);
    Ok(())
}

#[test]
fn cross_unit_reference_becomes_shared_export() -> Result<(), Box<dyn std::error::Error>> {
    let assembly = synthesize(&imported_role_app())?;
    let role_id = id(&["TestRole"]);
    let policy_id = id(&["Role", "Policy"]);

    let producer = assembly.document(ROLE_STACK).unwrap();
    assert_eq!(producer.outputs.len(), 1);
    let (key, output) = producer.outputs.first().unwrap();
    assert!(key.starts_with(&format!("ExportsOutputRef{}", role_id)));
    assert_eq!(output.value, json!({"ref": role_id}));
    let export_name = output.export.as_ref().unwrap().name.clone();
    assert_eq!(export_name, format!("{}:{}", ROLE_STACK, key));

    // The second stack reaches the role stack only transitively
    for consumer in [FIRST_STACK, SECOND_STACK] {
        let template = Template::from_assembly(&assembly, consumer)?;
        template.assert_at_path(
            &format!("resources.{}.properties.Roles.0", policy_id),
            &Matcher::exact(json!({"import-from-unit": ROLE_STACK, "export": export_name})),
        )?;
        template.assert_at_path(
            &format!("imports.{}.from-unit", export_name),
            &Matcher::exact(json!(ROLE_STACK)),
        )?;
    }
    Ok(())
}

#[test]
fn removing_the_dependency_makes_the_reference_unresolved() -> Result<(), Box<dyn std::error::Error>>
{
    let mut app = imported_role_app();
    let first = node(&app, FIRST_STACK);
    let roles = node(&app, ROLE_STACK);
    assert!(app.remove_dependency(first, roles)?);

    match synthesize(&app) {
        Err(SynthError::UnresolvedReference {
            node,
            target,
            to_unit,
            ..
        }) => {
            assert!(node.ends_with("/Role/Policy"));
            assert_eq!(target, format!("{}/TestRole", ROLE_STACK));
            assert_eq!(to_unit.as_deref(), Some(ROLE_STACK));
        }
        other => panic!("expected UnresolvedReference, got {:?}", other),
    }
    Ok(())
}

#[test]
fn closing_a_cycle_is_rejected_with_its_path() -> Result<(), Box<dyn std::error::Error>> {
    let mut app = imported_role_app();
    let roles = node(&app, ROLE_STACK);
    let assertions = node(&app, ASSERTION_STACK);

    let err = app.add_dependency(roles, assertions, None).unwrap_err();
    assert!(matches!(err, CoreError::CyclicDependency { .. }));
    let cycle = err.cycle().unwrap();
    assert_eq!(cycle.first(), cycle.last());
    assert_eq!(cycle[0], ROLE_STACK);

    // The rejected edge left the app synthesizable
    assert!(synthesize(&app).is_ok());
    Ok(())
}

#[test]
fn resource_component_is_hidden_from_logical_ids() -> Result<(), Box<dyn std::error::Error>> {
    let assembly = synthesize(&cognito_app())?;
    let template = Template::from_assembly(&assembly, "integ-cognito-listener")?;

    let pool_id = id(&["UserPool", "Resource"]);
    assert!(pool_id.starts_with("UserPool"));
    assert_eq!(pool_id.len(), "UserPool".len() + 8);
    template.assert_at_path(
        &format!("resources.{}.type", pool_id),
        &Matcher::exact(json!("AWS::Cognito::UserPool")),
    )?;

    template.has_resource_properties(
        "AWS::ElasticLoadBalancingV2::Listener",
        &json!({
            "DefaultActions": [{
                "Type": "authenticate-cognito",
                "AuthenticateCognitoConfig": {
                    "UserPoolArn": {"get-att": [pool_id, "Arn"]},
                    "UserPoolClientId": {"ref": id(&["UserPool", "Client", "Resource"])},
                }
            }]
        }),
    )?;
    template.resource_count_is("AWS::Cognito::UserPoolClient", 1)?;
    Ok(())
}

#[test]
fn outputs_and_resource_dependencies_render() -> Result<(), Box<dyn std::error::Error>> {
    let assembly = synthesize(&state_machine_app())?;
    let unit = "aws-stepfunctions-tasks-lambda-invoke-integ";
    let document = assembly.document(unit).unwrap();
    let machine_id = id(&["StateMachine", "Resource"]);

    assert_eq!(
        document.description.as_deref(),
        Some("Invokes a Lambda function from a state machine")
    );
    let output = document.output(&id(&["stateMachineArn"])).unwrap();
    assert_eq!(output.value, json!({"ref": machine_id}));
    assert_eq!(
        document.resource(&machine_id).unwrap().depends_on,
        vec![id(&["StateMachine", "Role"])]
    );

    let template = Template::from_assembly(&assembly, unit)?;
    template.assert_at_path(
        &format!(
            "resources.{}.properties.DefinitionSubstitutions.SubmitJobArn",
            machine_id
        ),
        &Matcher::exact(json!({"get-att": [id(&["submitJobLambda", "Resource"]), "Arn"]})),
    )?;
    template.resource_count_is("AWS::IAM::Role", 2)?;
    Ok(())
}

#[test]
fn nested_constructs_keep_their_path_in_ids() -> Result<(), Box<dyn std::error::Error>> {
    let assembly = Synthesizer::new(SynthConfig::default().with_path_metadata(true))
        .synthesize(&vpn_app())?;
    let template = Template::from_assembly(&assembly, "aws-cdk-ec2-vpn")?;
    let connection_id = id(&["MyVpc", "Dynamic", "Resource"]);

    assert!(connection_id.starts_with("MyVpcDynamic"));
    template.assert_at_path(
        &format!("resources.{}.depends-on.0", connection_id),
        &Matcher::exact(json!(id(&["MyVpc", "VPCVPNGW"]))),
    )?;
    template.assert_at_path(
        &format!("resources.{}.metadata.path", connection_id),
        &Matcher::exact(json!("aws-cdk-ec2-vpn/MyVpc/Dynamic/Resource")),
    )?;
    template.assert_at_path(
        &format!("resources.{}.properties.VpcId", id(&["MyVpc", "VPCVPNGW"])),
        &Matcher::exact(json!({"ref": id(&["MyVpc", "Resource"])})),
    )?;
    Ok(())
}

#[test]
fn cross_unit_resource_dependency_is_left_to_unit_order() -> Result<(), Box<dyn std::error::Error>>
{
    let assembly = synthesize(&fargate_app())?;
    let template = Template::from_assembly(&assembly, "aws-ecs-integ-service")?;
    let service_id = id(&["FargateService", "Service"]);

    template.assert_at_path(
        &format!("resources.{}.depends-on", service_id),
        &Matcher::Absent,
    )?;
    template.assert_at_path(
        &format!("resources.{}.properties.Cluster", service_id),
        &Matcher::object_like(json!({"import-from-unit": "aws-ecs-integ-cluster"})),
    )?;
    template.assert_at_path(
        &format!("resources.{}.properties.Cluster.export", service_id),
        &Matcher::pattern("^aws-ecs-integ-cluster:ExportsOutputRefFargateCluster")?,
    )?;
    Ok(())
}

#[test]
fn written_assembly_matches_manifest_digests() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let assembly = synthesize(&imported_role_app())?;
    assembly.write_to(dir.path())?;

    let manifest = Manifest::load(&dir.path().join(formwork_synth::assembly::MANIFEST_FILE))?;
    assert_eq!(&manifest, assembly.manifest());
    for (unit, artifact) in &manifest.units {
        let content = std::fs::read_to_string(dir.path().join(&artifact.template))?;
        assert_eq!(ContentDigest::of_str(&content), artifact.digest, "unit {}", unit);
    }
    Ok(())
}
