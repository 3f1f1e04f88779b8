//! Test fixtures for formwork synthesis testing
//!
//! Two kinds of fixtures are provided: applications built in code, for
//! library tests, and application definition files written to a temporary
//! directory, for CLI tests.

use formwork_core::{App, CfnResource, NodeId, OutputSpec, PropertyValue, Reference};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the definition file written by [`TestFixtures::setup`]
pub const APP_FILE: &str = "app.yaml";

pub const ROLE_STACK: &str = "integ-iam-imported-role-role-stack";
pub const FIRST_STACK: &str = "integ-iam-imported-role-1";
pub const SECOND_STACK: &str = "integ-iam-imported-role-2";
pub const ASSERTION_STACK: &str = "ImportedRoleTestAssertions";

/// Look a node up by path, panicking with the path on a miss
pub fn node(app: &App, path: &str) -> NodeId {
    app.tree()
        .find(path)
        .unwrap_or_else(|| panic!("fixture has no node at '{}'", path))
}

/// A role in one unit, consumed by policies in two other units, plus an
/// assertion unit deployed after everything else
///
/// The second consumer only reaches the role unit through the first one.
pub fn imported_role_app() -> App {
    let mut app = App::new();
    let role_stack = app.add_unit(ROLE_STACK).unwrap();
    let role = app
        .add_resource(
            role_stack,
            "TestRole",
            CfnResource::new("AWS::IAM::Role").with_property(
                "AssumeRolePolicyDocument",
                json!({
                    "Statement": [{
                        "Action": "sts:AssumeRole",
                        "Effect": "Allow",
                        "Principal": {"Service": "sqs.amazonaws.com"}
                    }],
                    "Version": "2012-10-17"
                }),
            ),
        )
        .unwrap();

    let first = app.add_unit(FIRST_STACK).unwrap();
    let second = app.add_unit(SECOND_STACK).unwrap();
    for (unit, queue) in [(first, "firstQueue"), (second, "secondQueue")] {
        let imported = app.add_construct(unit, "Role").unwrap();
        app.add_resource(
            imported,
            "Policy",
            CfnResource::new("AWS::IAM::Policy")
                .with_property("Roles", PropertyValue::list([Reference::to(role)]))
                .with_property(
                    "PolicyDocument",
                    json!({
                        "Statement": [{
                            "Action": "sqs:SendMessage",
                            "Effect": "Allow",
                            "Resource": format!("arn:aws:sqs:*:*:{}", queue)
                        }],
                        "Version": "2012-10-17"
                    }),
                ),
        )
        .unwrap();
    }

    app.add_dependency(first, role_stack, Some("The policy attaches to the role."))
        .unwrap();
    app.add_dependency(
        second,
        first,
        Some("So that this stack can be tested after both are deployed."),
    )
    .unwrap();

    let assertions = app.add_unit(ASSERTION_STACK).unwrap();
    for unit in [role_stack, first, second] {
        app.add_dependency(assertions, unit, None).unwrap();
    }
    app
}

/// A single unit whose listener points at a user pool and its client
pub fn cognito_app() -> App {
    let mut app = App::new();
    let unit = app.add_unit("integ-cognito-listener").unwrap();

    let pool = app.add_construct(unit, "UserPool").unwrap();
    let pool_resource = app
        .add_resource(pool, "Resource", CfnResource::new("AWS::Cognito::UserPool"))
        .unwrap();
    let client = app.add_construct(pool, "Client").unwrap();
    let client_resource = app
        .add_resource(
            client,
            "Resource",
            CfnResource::new("AWS::Cognito::UserPoolClient")
                .with_property("UserPoolId", Reference::to(pool_resource))
                .with_property("GenerateSecret", true),
        )
        .unwrap();
    let domain = app.add_construct(pool, "Domain").unwrap();
    let domain_resource = app
        .add_resource(
            domain,
            "Resource",
            CfnResource::new("AWS::Cognito::UserPoolDomain")
                .with_property("UserPoolId", Reference::to(pool_resource))
                .with_property("Domain", "test-domain"),
        )
        .unwrap();

    let lb = app.add_construct(unit, "LB").unwrap();
    let listener = app.add_construct(lb, "Listener").unwrap();
    app.add_resource(
        listener,
        "Resource",
        CfnResource::new("AWS::ElasticLoadBalancingV2::Listener")
            .with_property("Port", json!(443))
            .with_property(
                "DefaultActions",
                PropertyValue::list([PropertyValue::map([
                    ("Type", PropertyValue::from("authenticate-cognito")),
                    (
                        "AuthenticateCognitoConfig",
                        PropertyValue::map([
                            ("UserPoolArn", Reference::attribute(pool_resource, "Arn")),
                            ("UserPoolClientId", Reference::to(client_resource)),
                            ("UserPoolDomain", Reference::to(domain_resource)),
                        ]),
                    ),
                    ("Order", PropertyValue::from(json!(1))),
                ])]),
            ),
    )
    .unwrap();
    app
}

/// A function, its service role and a state machine invoking it, with the
/// machine's identifier published as an output
pub fn state_machine_app() -> App {
    let mut app = App::new();
    let unit = app
        .add_unit_with_description(
            "aws-stepfunctions-tasks-lambda-invoke-integ",
            Some("Invokes a Lambda function from a state machine".to_string()),
        )
        .unwrap();

    let function = app.add_construct(unit, "submitJobLambda").unwrap();
    let role = app
        .add_resource(function, "ServiceRole", CfnResource::new("AWS::IAM::Role"))
        .unwrap();
    let function_resource = app
        .add_resource(
            function,
            "Resource",
            CfnResource::new("AWS::Lambda::Function")
                .with_property("Handler", "index.handler")
                .with_property("Runtime", "nodejs18.x")
                .with_property("Role", Reference::attribute(role, "Arn")),
        )
        .unwrap();
    app.add_node_dependency(function_resource, role).unwrap();

    let machine = app.add_construct(unit, "StateMachine").unwrap();
    let machine_role = app
        .add_resource(machine, "Role", CfnResource::new("AWS::IAM::Role"))
        .unwrap();
    let machine_resource = app
        .add_resource(
            machine,
            "Resource",
            CfnResource::new("AWS::StepFunctions::StateMachine")
                .with_property("RoleArn", Reference::attribute(machine_role, "Arn"))
                .with_property(
                    "DefinitionSubstitutions",
                    PropertyValue::map([(
                        "SubmitJobArn",
                        Reference::attribute(function_resource, "Arn"),
                    )]),
                ),
        )
        .unwrap();
    app.add_node_dependency(machine_resource, machine_role).unwrap();

    app.add_output(
        unit,
        "stateMachineArn",
        OutputSpec::new(Reference::to(machine_resource)),
    )
    .unwrap();
    app
}

/// A VPC with a VPN gateway and one connection
pub fn vpn_app() -> App {
    let mut app = App::new();
    let unit = app.add_unit("aws-cdk-ec2-vpn").unwrap();

    let vpc = app.add_construct(unit, "MyVpc").unwrap();
    let vpc_resource = app
        .add_resource(
            vpc,
            "Resource",
            CfnResource::new("AWS::EC2::VPC").with_property("CidrBlock", "10.0.0.0/16"),
        )
        .unwrap();
    let gateway = app
        .add_resource(
            vpc,
            "VpnGateway",
            CfnResource::new("AWS::EC2::VPNGateway").with_property("Type", "ipsec.1"),
        )
        .unwrap();
    let attachment = app
        .add_resource(
            vpc,
            "VPCVPNGW",
            CfnResource::new("AWS::EC2::VPCGatewayAttachment")
                .with_property("VpcId", Reference::to(vpc_resource))
                .with_property("VpnGatewayId", Reference::to(gateway)),
        )
        .unwrap();

    let vpn = app.add_construct(vpc, "Dynamic").unwrap();
    let customer_gateway = app
        .add_resource(
            vpn,
            "CustomerGateway",
            CfnResource::new("AWS::EC2::CustomerGateway")
                .with_property("BgpAsn", json!(65000))
                .with_property("IpAddress", "52.85.255.164")
                .with_property("Type", "ipsec.1"),
        )
        .unwrap();
    let connection = app
        .add_resource(
            vpn,
            "Resource",
            CfnResource::new("AWS::EC2::VPNConnection")
                .with_property("CustomerGatewayId", Reference::to(customer_gateway))
                .with_property("VpnGatewayId", Reference::to(gateway))
                .with_property("StaticRoutesOnly", false),
        )
        .unwrap();
    app.add_node_dependency(connection, attachment).unwrap();
    app
}

/// A cluster unit and a service unit that runs on it
pub fn fargate_app() -> App {
    let mut app = App::new();
    let cluster_unit = app.add_unit("aws-ecs-integ-cluster").unwrap();
    let cluster = app
        .add_resource(cluster_unit, "FargateCluster", CfnResource::new("AWS::ECS::Cluster"))
        .unwrap();

    let service_unit = app.add_unit("aws-ecs-integ-service").unwrap();
    let task = app.add_construct(service_unit, "TaskDef").unwrap();
    let task_resource = app
        .add_resource(
            task,
            "Resource",
            CfnResource::new("AWS::ECS::TaskDefinition")
                .with_property("Cpu", "256")
                .with_property("Memory", "512")
                .with_property(
                    "ContainerDefinitions",
                    json!([{
                        "Name": "web",
                        "Image": "amazon/amazon-ecs-sample",
                        "Environment": [{"Name": "TEST_ENVIRONMENT_VARIABLE", "Value": "test"}]
                    }]),
                ),
        )
        .unwrap();
    let service = app.add_construct(service_unit, "FargateService").unwrap();
    let service_resource = app
        .add_resource(
            service,
            "Service",
            CfnResource::new("AWS::ECS::Service")
                .with_property("Cluster", Reference::to(cluster))
                .with_property("TaskDefinition", Reference::to(task_resource))
                .with_property("LaunchType", "FARGATE"),
        )
        .unwrap();
    app.add_node_dependency(service_resource, cluster).unwrap();
    app.add_dependency(service_unit, cluster_unit, Some("services run on the cluster"))
        .unwrap();
    app
}

/// Definition file categories
pub enum FixtureType {
    /// Three units with a cross-unit attribute reference
    CrossUnit,
    /// A reference declared before its target
    ForwardReference,
    /// A cross-unit reference with no unit dependency
    MissingDependency,
    /// Two units that depend on each other
    Cycle,
    /// A definition plus a `formwork.toml` enabling path metadata
    WithSettings,
}

/// Main test fixtures provider
///
/// Every directory created by [`TestFixtures::setup`] lives as long as the
/// provider does.
pub struct TestFixtures {
    temp_dirs: Vec<tempfile::TempDir>,
}

impl Default for TestFixtures {
    fn default() -> Self {
        Self::new()
    }
}

impl TestFixtures {
    pub fn new() -> Self {
        Self {
            temp_dirs: Vec::new(),
        }
    }

    /// Create a temporary directory holding [`APP_FILE`] for the fixture
    pub fn setup(&mut self, fixture_type: FixtureType) -> PathBuf {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();

        match fixture_type {
            FixtureType::CrossUnit => self.write_app(&path, CROSS_UNIT),
            FixtureType::ForwardReference => self.write_app(&path, FORWARD_REFERENCE),
            FixtureType::MissingDependency => self.write_app(&path, MISSING_DEPENDENCY),
            FixtureType::Cycle => self.write_app(&path, CYCLE),
            FixtureType::WithSettings => {
                self.write_app(&path, CROSS_UNIT);
                fs::write(
                    path.join("formwork.toml"),
                    "output_dir = \"assembly.out\"\npath_metadata = true\n",
                )
                .unwrap();
            }
        }

        self.temp_dirs.push(dir);
        path
    }

    fn write_app(&self, base: &Path, content: &str) {
        fs::write(base.join(APP_FILE), content).unwrap();
    }
}

const CROSS_UNIT: &str = r#"units:
  - name: Network
    description: Shared networking
    constructs:
      - name: Vpc
        type: AWS::EC2::VPC
        properties:
          CidrBlock: 10.0.0.0/16
  - name: Data
    depends_on:
      - unit: Network
        reason: the table lives in the VPC
    constructs:
      - name: Table
        type: AWS::DynamoDB::Table
        properties:
          BillingMode: PAY_PER_REQUEST
  - name: Api
    depends_on:
      - unit: Data
        reason: handlers read the table
    constructs:
      - name: Handler
        children:
          - name: Resource
            type: AWS::Lambda::Function
            properties:
              Runtime: nodejs18.x
              Environment:
                Variables:
                  TABLE_ARN:
                    $get-att: [Data/Table, Arn]
                  VPC_ID:
                    $ref: Network/Vpc
    outputs:
      - name: HandlerArn
        value:
          $get-att: [Api/Handler/Resource, Arn]
        description: ARN of the API handler
"#;

const FORWARD_REFERENCE: &str = r#"units:
  - name: Queues
    constructs:
      - name: Worker
        type: AWS::SQS::Queue
        properties:
          RedrivePolicy:
            deadLetterTargetArn:
              $get-att: [Queues/DeadLetters, Arn]
            maxReceiveCount: 3
      - name: DeadLetters
        type: AWS::SQS::Queue
"#;

const MISSING_DEPENDENCY: &str = r#"units:
  - name: Roles
    constructs:
      - name: TestRole
        type: AWS::IAM::Role
  - name: Consumer
    constructs:
      - name: Function
        type: AWS::Lambda::Function
        properties:
          Role:
            $get-att: [Roles/TestRole, Arn]
"#;

const CYCLE: &str = r#"units:
  - name: A
    depends_on:
      - unit: B
  - name: B
    depends_on:
      - unit: A
"#;
